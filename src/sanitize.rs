//! Query text normalization applied before a statement reaches a driver

/// Cleans raw query text. Connectors call this on every statement they run.
pub trait Sanitizer: Send + Sync {
    fn sanitize(&self, sql: &str) -> String;
}

impl<F> Sanitizer for F
where
    F: Fn(&str) -> String + Send + Sync,
{
    fn sanitize(&self, sql: &str) -> String {
        self(sql)
    }
}

/// Default sanitizer: trims surrounding whitespace and trailing statement
/// terminators.
#[derive(Debug, Clone, Copy, Default)]
pub struct TrimSanitizer;

impl Sanitizer for TrimSanitizer {
    fn sanitize(&self, sql: &str) -> String {
        sql.trim()
            .trim_end_matches(|c: char| c == ';' || c.is_whitespace())
            .to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trim_sanitizer() {
        let s = TrimSanitizer;
        assert_eq!(s.sanitize("  SELECT 1 ;; \n"), "SELECT 1");
        assert_eq!(s.sanitize("SELECT ';'"), "SELECT ';'");
        assert_eq!(s.sanitize(" ; "), "");
    }

    #[test]
    fn test_closure_sanitizer() {
        let upper = |sql: &str| sql.to_uppercase();
        assert_eq!(upper.sanitize("select 1"), "SELECT 1");
    }
}
