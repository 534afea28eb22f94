//! Splitting of raw range responses into result lines.

/// Raw payload from a range server.
///
/// Some server implementations terminate their output with a newline and
/// some do not, so construction appends the final newline when missing and
/// everything downstream sees one canonical form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    buf: Vec<u8>,
}

impl Response {
    /// Wraps raw body bytes, normalizing the trailing newline.
    pub fn from_bytes(mut buf: Vec<u8>) -> Self {
        if buf.last() != Some(&b'\n') {
            buf.push(b'\n');
        }
        Self { buf }
    }

    /// The normalized payload bytes.
    pub fn bytes(&self) -> &[u8] {
        &self.buf
    }

    /// Splits the payload into one string per result line.
    pub fn lines(&self) -> Vec<String> {
        if self.buf.len() <= 1 {
            // A lone newline is the normalized form of an empty response.
            return Vec::new();
        }
        String::from_utf8_lossy(&self.buf)
            .lines()
            .map(str::to_owned)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_body_has_no_lines() {
        assert!(Response::from_bytes(Vec::new()).lines().is_empty());
    }

    #[test]
    fn lone_newline_has_no_lines() {
        assert!(Response::from_bytes(b"\n".to_vec()).lines().is_empty());
    }

    #[test]
    fn single_line_with_and_without_terminator() {
        assert_eq!(Response::from_bytes(b"one".to_vec()).lines(), vec!["one"]);
        assert_eq!(Response::from_bytes(b"one\n".to_vec()).lines(), vec!["one"]);
    }

    #[test]
    fn multiple_lines_with_and_without_terminator() {
        let want = vec!["a", "b", "c"];
        assert_eq!(Response::from_bytes(b"a\nb\nc".to_vec()).lines(), want);
        assert_eq!(Response::from_bytes(b"a\nb\nc\n".to_vec()).lines(), want);
    }

    #[test]
    fn interior_blank_lines_are_preserved() {
        assert_eq!(
            Response::from_bytes(b"a\n\nb\n".to_vec()).lines(),
            vec!["a", "", "b"]
        );
    }

    #[test]
    fn bytes_are_normalized() {
        assert_eq!(Response::from_bytes(b"one".to_vec()).bytes(), b"one\n");
        assert_eq!(Response::from_bytes(b"one\n".to_vec()).bytes(), b"one\n");
    }
}
