//! Indentation-aware C text sink

use std::fmt;

const INDENT: &str = "    ";

#[derive(Debug, Default, Clone)]
pub struct SourceWriter {
    out: String,
    depth: usize,
}

impl SourceWriter {
    pub fn new() -> Self {
        Self::default()
    }

    /// One statement or declaration on its own line
    pub fn line(&mut self, text: impl AsRef<str>) {
        let text = text.as_ref();
        if text.is_empty() {
            self.out.push('\n');
            return;
        }
        for _ in 0..self.depth {
            self.out.push_str(INDENT);
        }
        self.out.push_str(text);
        self.out.push('\n');
    }

    pub fn blank(&mut self) {
        self.out.push('\n');
    }

    /// Text without indentation or trailing newline
    pub fn raw(&mut self, text: impl AsRef<str>) {
        self.out.push_str(text.as_ref());
    }

    /// `l0012:`; labels sit one level left of the statements they mark
    pub fn label(&mut self, name: impl AsRef<str>) {
        for _ in 0..self.depth.saturating_sub(1) {
            self.out.push_str(INDENT);
        }
        self.out.push_str(name.as_ref());
        self.out.push_str(":\n");
    }

    /// `header {` and indent
    pub fn open(&mut self, header: impl AsRef<str>) {
        let header = header.as_ref();
        if header.is_empty() {
            self.line("{");
        } else {
            self.line(format!("{} {{", header));
        }
        self.depth += 1;
    }

    /// Dedent and `}` (plus an optional suffix such as `;`)
    pub fn close(&mut self, suffix: &str) {
        self.depth = self.depth.saturating_sub(1);
        self.line(format!("}}{}", suffix));
    }

    pub fn indent(&mut self) {
        self.depth += 1;
    }

    pub fn dedent(&mut self) {
        self.depth = self.depth.saturating_sub(1);
    }

    /// Append everything another writer produced, re-indented to this depth
    pub fn append(&mut self, other: &SourceWriter) {
        for line in other.out.lines() {
            self.line(line);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.out.is_empty()
    }

    pub fn as_str(&self) -> &str {
        &self.out
    }

    pub fn finish(self) -> String {
        self.out
    }
}

impl fmt::Display for SourceWriter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_blocks_indent() {
        let mut w = SourceWriter::new();
        w.open("void f()");
        w.line("x = 1;");
        w.open("if (x)");
        w.line("return;");
        w.close("");
        w.close("");
        assert_eq!(
            w.finish(),
            "void f() {\n    x = 1;\n    if (x) {\n        return;\n    }\n}\n"
        );
    }

    #[test]
    fn test_labels_outdent() {
        let mut w = SourceWriter::new();
        w.open("void f()");
        w.label("l0000");
        w.line("return 0;");
        w.close("");
        assert_eq!(w.finish(), "void f() {\nl0000:\n    return 0;\n}\n");
    }

    #[test]
    fn test_append_reindents() {
        let mut inner = SourceWriter::new();
        inner.line("a;");
        let mut outer = SourceWriter::new();
        outer.open("");
        outer.append(&inner);
        outer.close("");
        assert_eq!(outer.finish(), "{\n    a;\n}\n");
    }
}
