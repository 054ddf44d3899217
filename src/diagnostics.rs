use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiagnosticSeverity {
    Warning,
    Info,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiagnosticKind {
    /// A `case` line whose opcode has no reference entry
    LookupMiss,
    /// A literal longer than one byte looked up without truncation
    WideLiteral,
}

#[derive(Debug, Clone)]
pub struct Diagnostic {
    pub line: usize, // 1-based, as editors show it
    pub severity: DiagnosticSeverity,
    pub kind: DiagnosticKind,
    pub message: String,
}

impl Diagnostic {
    pub fn lookup_miss(line: usize, key: &str, table: &str) -> Self {
        Self {
            line,
            severity: DiagnosticSeverity::Warning,
            kind: DiagnosticKind::LookupMiss,
            message: format!("no {} entry for {}", table, key),
        }
    }

    pub fn wide_literal(line: usize, literal: &str) -> Self {
        Self {
            line,
            severity: DiagnosticSeverity::Warning,
            kind: DiagnosticKind::WideLiteral,
            message: format!("{} is wider than one opcode byte, looked up as-is", literal),
        }
    }

    pub fn with_severity(mut self, severity: DiagnosticSeverity) -> Self {
        self.severity = severity;
        self
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let severity = match self.severity {
            DiagnosticSeverity::Warning => "warning",
            DiagnosticSeverity::Info => "info",
        };
        write!(f, "line {}: {}: {}", self.line, severity, self.message)
    }
}

/// Count diagnostics of one kind
pub fn count_by_kind(diagnostics: &[Diagnostic], kind: DiagnosticKind) -> usize {
    diagnostics.iter().filter(|d| d.kind == kind).count()
}

/// Count warnings and infos
pub fn count_by_severity(diagnostics: &[Diagnostic]) -> (usize, usize) {
    let warnings = diagnostics
        .iter()
        .filter(|d| d.severity == DiagnosticSeverity::Warning)
        .count();
    let infos = diagnostics
        .iter()
        .filter(|d| d.severity == DiagnosticSeverity::Info)
        .count();
    (warnings, infos)
}
