//! Appends opcode descriptions to the `case` lines of an emulator's dispatch switch

use anyhow::{bail, Context, Result};
use regex::Regex;
use std::fs;
use std::path::Path;

use crate::diagnostics::{Diagnostic, DiagnosticSeverity};
use crate::reference::{OpcodeMap, Reference};

const COMMENT_MARKER: &str = "://";

/// Leading whitespace required before `case`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndentRule {
    /// One or more whitespace characters
    Any,
    /// Exactly this many spaces
    Exact(usize),
}

/// How a matched literal becomes a table key
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyTransform {
    Identity,
    /// `0x10f` -> `0x0f`, for 16-bit compatibility codes
    LastTwoDigits,
}

impl KeyTransform {
    /// The result is always lowercase.
    pub fn apply(self, literal: &str) -> String {
        let lower = literal.to_ascii_lowercase();
        match self {
            KeyTransform::Identity => lower,
            KeyTransform::LastTwoDigits => {
                let digits = lower.strip_prefix("0x").unwrap_or(lower.as_str());
                let low = &digits[digits.len().saturating_sub(2)..];
                format!("0x{:0>2}", low)
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Region {
    Before,
    OneByte,
    TwoByte,
    After,
}

/// Line-index boundaries of the one-byte and two-byte dispatch blocks.
///
/// `[onebyte_start, twobyte_start)` is the one-byte window and
/// `[twobyte_start, twobyte_end)` the two-byte window. Everything else is
/// copied through.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Windows {
    onebyte_start: usize,
    twobyte_start: usize,
    twobyte_end: usize,
}

impl Windows {
    pub fn new(onebyte_start: usize, twobyte_start: usize, twobyte_end: usize) -> Result<Self> {
        if onebyte_start > twobyte_start || twobyte_start > twobyte_end {
            bail!(
                "Line windows out of order: onebyte_start={}, twobyte_start={}, twobyte_end={}",
                onebyte_start,
                twobyte_start,
                twobyte_end
            );
        }
        Ok(Self {
            onebyte_start,
            twobyte_start,
            twobyte_end,
        })
    }

    pub fn region(&self, index: usize) -> Region {
        if index < self.onebyte_start {
            Region::Before
        } else if index < self.twobyte_start {
            Region::OneByte
        } else if index < self.twobyte_end {
            Region::TwoByte
        } else {
            Region::After
        }
    }
}

#[derive(Debug, Clone)]
pub struct CasePattern {
    regex: Regex,
}

impl CasePattern {
    pub fn new(indent: IndentRule) -> Result<Self> {
        let prefix = match indent {
            IndentRule::Any => String::from(r"\s+"),
            IndentRule::Exact(n) => format!(" {{{}}}", n),
        };
        let regex = Regex::new(&format!(r"^{}case (0x[0-9A-Fa-f]+):", prefix))
            .context("Failed to compile case pattern")?;
        Ok(Self { regex })
    }

    /// Split a `case 0x..:` line, if it is one
    pub fn find<'a>(&self, line: &'a str) -> Option<CaseMatch<'a>> {
        let caps = self.regex.captures(line)?;
        let literal = caps.get(1)?;
        // the pattern ends in the `:` right after the literal
        Some(CaseMatch {
            head: &line[..literal.end()],
            literal: literal.as_str(),
            rest: &line[literal.end() + 1..],
        })
    }
}

/// A matched `case` line split around its colon
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaseMatch<'a> {
    /// Indent, `case` and the literal
    pub head: &'a str,
    pub literal: &'a str,
    /// Everything after the colon
    pub rest: &'a str,
}

/// Split text into lines, each keeping its own terminator.
pub fn split_lines(text: &str) -> Vec<&str> {
    text.split_inclusive('\n').collect()
}

fn split_terminator(line: &str) -> (&str, &str) {
    if let Some(body) = line.strip_suffix("\r\n") {
        (body, "\r\n")
    } else if let Some(body) = line.strip_suffix('\n') {
        (body, "\n")
    } else {
        (line, "")
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WindowStats {
    pub matched: usize,
    pub annotated: usize,
}

impl WindowStats {
    pub fn misses(&self) -> usize {
        self.matched - self.annotated
    }
}

#[derive(Debug, Clone, Default)]
pub struct AnnotationReport {
    pub lines: usize,
    pub one_byte: WindowStats,
    pub two_byte: WindowStats,
    pub diagnostics: Vec<Diagnostic>,
}

impl AnnotationReport {
    pub fn annotated(&self) -> usize {
        self.one_byte.annotated + self.two_byte.annotated
    }

    pub fn misses(&self) -> usize {
        self.one_byte.misses() + self.two_byte.misses()
    }
}

#[derive(Debug, Clone)]
pub struct Annotated {
    pub lines: Vec<String>,
    pub report: AnnotationReport,
}

impl Annotated {
    pub fn text(&self) -> String {
        self.lines.concat()
    }
}

pub struct Annotator<'r> {
    reference: &'r Reference,
    pattern: CasePattern,
    transform: KeyTransform,
    windows: Windows,
}

impl<'r> Annotator<'r> {
    pub fn new(
        reference: &'r Reference,
        indent: IndentRule,
        transform: KeyTransform,
        windows: Windows,
    ) -> Result<Self> {
        Ok(Self {
            reference,
            pattern: CasePattern::new(indent)?,
            transform,
            windows,
        })
    }

    pub fn annotate(&self, lines: &[&str]) -> Annotated {
        let mut report = AnnotationReport {
            lines: lines.len(),
            ..AnnotationReport::default()
        };

        let out = lines
            .iter()
            .enumerate()
            .map(|(index, line)| {
                let (map, stats, table) = match self.windows.region(index) {
                    Region::OneByte => (&self.reference.one_byte, &mut report.one_byte, "one-byte"),
                    Region::TwoByte => (&self.reference.two_byte, &mut report.two_byte, "two-byte"),
                    Region::Before | Region::After => return line.to_string(),
                };
                match self.annotate_line(index + 1, line, map, table, &mut report.diagnostics) {
                    LineOutcome::Annotated(text) => {
                        stats.matched += 1;
                        stats.annotated += 1;
                        text
                    }
                    LineOutcome::Missed => {
                        stats.matched += 1;
                        line.to_string()
                    }
                    LineOutcome::Unmatched => line.to_string(),
                }
            })
            .collect();

        Annotated { lines: out, report }
    }

    fn annotate_line(
        &self,
        line_no: usize,
        line: &str,
        map: &OpcodeMap,
        table: &str,
        diagnostics: &mut Vec<Diagnostic>,
    ) -> LineOutcome {
        let (body, terminator) = split_terminator(line);
        let Some(case) = self.pattern.find(body) else {
            return LineOutcome::Unmatched;
        };
        let literal = case.literal;

        let key = self.transform.apply(literal);
        let description = map.get(&key);

        if self.transform == KeyTransform::Identity && literal.len() > 4 {
            let diag = Diagnostic::wide_literal(line_no, literal);
            diagnostics.push(if description.is_some() {
                diag.with_severity(DiagnosticSeverity::Info)
            } else {
                diag
            });
        }

        match description {
            Some(description) => {
                let terminator = if terminator.is_empty() { "\n" } else { terminator };
                // A bare `case 0x..:` has its colon replaced by the marker;
                // trailing code is kept and the comment goes after it.
                let kept = if case.rest.trim().is_empty() {
                    case.head
                } else {
                    body
                };
                LineOutcome::Annotated(format!(
                    "{}{}{}{}",
                    kept, COMMENT_MARKER, description, terminator
                ))
            }
            None => {
                diagnostics.push(Diagnostic::lookup_miss(line_no, &key, table));
                LineOutcome::Missed
            }
        }
    }
}

enum LineOutcome {
    Annotated(String),
    Missed,
    Unmatched,
}

/// Annotate `input` into a fresh `output` file; `input` is left untouched.
pub fn annotate_file(annotator: &Annotator, input: &Path, output: &Path) -> Result<AnnotationReport> {
    if output.exists() && fs::canonicalize(input).ok() == fs::canonicalize(output).ok() {
        bail!("Refusing to overwrite the input file: {}", input.display());
    }

    let content = fs::read_to_string(input)
        .with_context(|| format!("Failed to read target: {}", input.display()))?;
    let lines = split_lines(&content);
    let annotated = annotator.annotate(&lines);

    fs::write(output, annotated.text())
        .with_context(|| format!("Failed to write output: {}", output.display()))?;

    Ok(annotated.report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagnostics::{count_by_severity, DiagnosticKind};
    use std::path::PathBuf;
    use std::process;
    use std::time::{SystemTime, UNIX_EPOCH};

    fn reference() -> Reference {
        Reference {
            one_byte: [("0x00", "ADD Eb Gb add byte"), ("0x0a", "OR Gb Eb or byte")]
                .into_iter()
                .collect(),
            two_byte: [("0xa2", "CPUID   CPU Identification")].into_iter().collect(),
        }
    }

    fn annotator(reference: &Reference, indent: IndentRule, transform: KeyTransform) -> Annotator<'_> {
        Annotator::new(reference, indent, transform, Windows::new(1, 4, 6).unwrap()).unwrap()
    }

    #[test]
    fn test_bare_case_line() {
        let reference = reference();
        let annotator = annotator(&reference, IndentRule::Any, KeyTransform::Identity);
        let out = annotator.annotate(&["// header\n", "    case 0x00:"]);

        assert_eq!(out.lines[1], "    case 0x00://ADD Eb Gb add byte\n");
        assert_eq!(out.report.one_byte.annotated, 1);
    }

    #[test]
    fn test_trailing_code_is_preserved() {
        let reference = reference();
        let annotator = annotator(&reference, IndentRule::Any, KeyTransform::Identity);
        let out = annotator.annotate(&["\n", "    case 0x00: doSomething();\n"]);

        assert_eq!(out.lines[1], "    case 0x00: doSomething();://ADD Eb Gb add byte\n");
    }

    #[test]
    fn test_crlf_terminator_kept() {
        let reference = reference();
        let annotator = annotator(&reference, IndentRule::Any, KeyTransform::Identity);
        let out = annotator.annotate(&["\r\n", "\tcase 0x0A:\r\n"]);

        assert_eq!(out.lines[1], "\tcase 0x0A://OR Gb Eb or byte\r\n");
    }

    #[test]
    fn test_lookup_miss_passes_through() {
        let reference = reference();
        let annotator = annotator(&reference, IndentRule::Any, KeyTransform::Identity);
        let out = annotator.annotate(&["\n", "    case 0x01:\n"]);

        assert_eq!(out.lines[1], "    case 0x01:\n");
        assert!(!out.lines[1].contains(COMMENT_MARKER));
        assert_eq!(out.report.one_byte.misses(), 1);
        assert_eq!(out.report.diagnostics.len(), 1);
        assert_eq!(out.report.diagnostics[0].kind, DiagnosticKind::LookupMiss);
        assert_eq!(out.report.diagnostics[0].line, 2);
    }

    #[test]
    fn test_lines_outside_windows_untouched() {
        let reference = reference();
        let annotator = annotator(&reference, IndentRule::Any, KeyTransform::Identity);
        let input = [
            "    case 0x00:\n", // before
            "    case 0x00:\n", // one-byte
            "  default:\n",
            "    case 0xa2:\n",
            "    case 0xa2:\n", // two-byte
            "    case 0x00:\n",
            "    case 0xa2:\n", // after
        ];
        let out = annotator.annotate(&input);

        assert_eq!(out.lines.len(), input.len());
        assert_eq!(out.lines[0], input[0]);
        assert_eq!(out.lines[1], "    case 0x00://ADD Eb Gb add byte\n");
        assert_eq!(out.lines[2], input[2]);
        // 0xa2 is two-byte only
        assert_eq!(out.lines[3], input[3]);
        assert_eq!(out.lines[4], "    case 0xa2://CPUID   CPU Identification\n");
        // 0x00 is one-byte only
        assert_eq!(out.lines[5], input[5]);
        assert_eq!(out.lines[6], input[6]);
        assert_eq!(out.report.annotated(), 2);
        assert_eq!(out.report.misses(), 2);
    }

    #[test]
    fn test_non_case_lines_untouched() {
        let reference = reference();
        let annotator = annotator(&reference, IndentRule::Any, KeyTransform::Identity);
        let input = [
            "\n",
            "case 0x00:\n",
            "    // case 0x00:\n",
            "    case 0x00 :\n",
            "    case 00:\n",
        ];
        let out = annotator.annotate(&input);

        for (got, want) in out.lines.iter().zip(input.iter()) {
            assert_eq!(got, want);
        }
        assert_eq!(out.report.one_byte.matched, 0);
    }

    #[test]
    fn test_exact_indent() {
        let reference = reference();
        let annotator = annotator(&reference, IndentRule::Exact(12), KeyTransform::Identity);
        let twelve = format!("{}case 0x00:\n", " ".repeat(12));
        let eight = format!("{}case 0x00:\n", " ".repeat(8));
        let sixteen = format!("{}case 0x00:\n", " ".repeat(16));
        let out = annotator.annotate(&["\n", &twelve, &eight, &sixteen]);

        assert!(out.lines[1].ends_with("://ADD Eb Gb add byte\n"));
        assert_eq!(out.lines[2], eight);
        assert_eq!(out.lines[3], sixteen);
    }

    #[test]
    fn test_last_two_digits_transform() {
        assert_eq!(KeyTransform::LastTwoDigits.apply("0x100"), "0x00");
        assert_eq!(KeyTransform::LastTwoDigits.apply("0x10A"), "0x0a");
        assert_eq!(KeyTransform::LastTwoDigits.apply("0x5"), "0x05");
        assert_eq!(KeyTransform::Identity.apply("0x10A"), "0x10a");

        let reference = reference();
        let annotator = annotator(&reference, IndentRule::Any, KeyTransform::LastTwoDigits);
        let out = annotator.annotate(&["\n", "    case 0x10a:\n"]);
        assert_eq!(out.lines[1], "    case 0x10a://OR Gb Eb or byte\n");
        assert!(out.report.diagnostics.is_empty());
    }

    #[test]
    fn test_wide_literal_flagged() {
        let reference = reference();
        let annotator = annotator(&reference, IndentRule::Any, KeyTransform::Identity);
        let out = annotator.annotate(&["\n", "    case 0x10a:\n"]);

        assert_eq!(out.lines[1], "    case 0x10a:\n");
        let kinds: Vec<_> = out.report.diagnostics.iter().map(|d| d.kind).collect();
        assert_eq!(kinds, vec![DiagnosticKind::WideLiteral, DiagnosticKind::LookupMiss]);
        assert_eq!(count_by_severity(&out.report.diagnostics), (2, 0));
    }

    #[test]
    fn test_windows_regions() {
        let windows = Windows::new(2, 4, 4).unwrap();
        assert_eq!(windows.region(0), Region::Before);
        assert_eq!(windows.region(2), Region::OneByte);
        assert_eq!(windows.region(3), Region::OneByte);
        assert_eq!(windows.region(4), Region::After);
        assert!(Windows::new(3, 2, 5).is_err());
        assert!(Windows::new(1, 6, 5).is_err());
    }

    #[test]
    fn test_split_lines_keeps_count_and_bytes() {
        let text = "a\r\n\nb\nlast";
        let lines = split_lines(text);
        assert_eq!(lines, vec!["a\r\n", "\n", "b\n", "last"]);
        assert_eq!(lines.concat(), text);
        assert!(split_lines("").is_empty());
    }

    fn create_temp_dir(label: &str) -> PathBuf {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_nanos();
        let dir = std::env::temp_dir().join(format!("opnote-{label}-{}-{nanos}", process::id()));
        fs::create_dir_all(&dir).expect("Create temp dir");
        dir
    }

    #[test]
    fn test_annotate_file() {
        let dir = create_temp_dir("annotate");
        let input = dir.join("cpux86-ta.js");
        let output = dir.join("cpux86-ta-auto-annotated.js");
        let source = "switch (OPbyte) {\n    case 0x00:\n    case 0x01:\n}\n    case 0xa2:\n  }\n";
        fs::write(&input, source).unwrap();

        let reference = reference();
        let annotator = annotator(&reference, IndentRule::Any, KeyTransform::Identity);
        let report = annotate_file(&annotator, &input, &output).unwrap();

        let written = fs::read_to_string(&output).unwrap();
        assert_eq!(written.lines().count(), source.lines().count());
        assert_eq!(
            written,
            "switch (OPbyte) {\n    case 0x00://ADD Eb Gb add byte\n    case 0x01:\n}\n    case 0xa2://CPUID   CPU Identification\n  }\n"
        );
        assert_eq!(fs::read_to_string(&input).unwrap(), source);
        assert_eq!(report.lines, 6);
        assert_eq!(report.annotated(), 2);
        assert_eq!(report.misses(), 1);

        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_annotate_file_refuses_in_place() {
        let dir = create_temp_dir("in-place");
        let input = dir.join("cpux86-ta.js");
        fs::write(&input, "    case 0x00:\n").unwrap();

        let reference = reference();
        let annotator = annotator(&reference, IndentRule::Any, KeyTransform::Identity);
        assert!(annotate_file(&annotator, &input, &input).is_err());
        assert_eq!(fs::read_to_string(&input).unwrap(), "    case 0x00:\n");

        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_missing_target_is_fatal() {
        let dir = create_temp_dir("missing-target");
        let output = dir.join("out.js");

        let reference = reference();
        let annotator = annotator(&reference, IndentRule::Any, KeyTransform::Identity);
        let err = annotate_file(&annotator, &dir.join("nope.js"), &output).unwrap_err();
        assert!(err.to_string().contains("Failed to read target"));
        assert!(!output.exists());

        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_whitespace_after_colon_counts_as_bare() {
        let reference = reference();
        let annotator = annotator(&reference, IndentRule::Any, KeyTransform::Identity);
        let out = annotator.annotate(&["\n", "    case 0x00:   \n", "    case 0x00:\t// add\n"]);

        assert_eq!(out.lines[1], "    case 0x00://ADD Eb Gb add byte\n");
        assert_eq!(out.lines[2], "    case 0x00:\t// add://ADD Eb Gb add byte\n");
    }

    #[test]
    fn test_case_pattern_split() {
        let pattern = CasePattern::new(IndentRule::Any).unwrap();
        let case = pattern.find("  case 0x1F: x = 1;").unwrap();

        assert_eq!(case.head, "  case 0x1F");
        assert_eq!(case.literal, "0x1F");
        assert_eq!(case.rest, " x = 1;");
        assert_eq!(pattern.find("  case 1:"), None);
    }

    #[test]
    fn test_transform_without_prefix() {
        assert_eq!(KeyTransform::LastTwoDigits.apply(""), "0x00");
        assert_eq!(KeyTransform::LastTwoDigits.apply("f"), "0x0f");
        assert_eq!(KeyTransform::LastTwoDigits.apply("1AB"), "0xab");
        assert_eq!(KeyTransform::Identity.apply("0"), "0");
    }

    #[test]
    fn test_annotate_with_pretty_printed_reference() {
        let xml = r#"<x86reference>
  <one-byte>
    <pri_opcd value="00">
      <entry>
        <syntax>
          <mnem>ADD</mnem>
          <dst>
            <a>E</a>
            <t>b</t>
          </dst>
          <src>
            <a>G</a>
            <t>b</t>
          </src>
        </syntax>
        <note>
          <brief>Add
             two bytes</brief>
        </note>
      </entry>
    </pri_opcd>
  </one-byte>
  <two-byte>
    <pri_opcd value="A2">
      <entry>
        <syntax>
          <mnem>CPUID</mnem>
        </syntax>
        <note>
          <brief>
            CPU
            Identification
          </brief>
        </note>
      </entry>
    </pri_opcd>
  </two-byte>
</x86reference>
"#;
        let reference = crate::reference::parse_reference(xml).unwrap();
        let annotator = Annotator::new(
            &reference,
            IndentRule::Any,
            KeyTransform::Identity,
            Windows::new(1, 3, 4).unwrap(),
        )
        .unwrap();

        let source = "switch (OPbyte) {\n    case 0x00:\n    case 0x01: break;\n        case 0xA2:\n";
        let lines = split_lines(source);
        let out = annotator.annotate(&lines);
        let text = out.text();

        assert_eq!(split_lines(&text).len(), lines.len());
        assert_eq!(
            text,
            "switch (OPbyte) {\n    case 0x00://ADD Gb Eb Add two bytes\n    case 0x01: break;\n        case 0xA2://CPUID   CPU Identification\n"
        );
        assert_eq!(out.report.annotated(), 2);
        assert_eq!(out.report.misses(), 1);
    }
}
