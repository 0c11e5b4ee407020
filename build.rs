use grep::regex::RegexMatcher;
use grep::searcher::{Searcher, Sink, SinkMatch};
use std::error::Error;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

// Only our own sources are policed; vendored or generated code is not.
const SOURCE_DIRS: [&str; 4] = ["sage", "cli", "tests", "benches"];

const FORBIDDEN_WORDS: &str = "FIXED|CORRECTED|FIX|FIXES|NEW|CHANGED|CHANGES|CHANGE|MODIFIED|MODIFIES|MODIFY|UPDATED|UPDATES|UPDATE";

#[derive(Clone, Copy)]
enum Rule {
    UnderscorePrefix,
    AllowDeadCode,
    ForbiddenWord,
    StarsInComment,
    AllUppercaseComment,
}

impl Rule {
    fn pattern(self) -> String {
        match self {
            Rule::UnderscorePrefix => r"\b(_[a-zA-Z0-9_]+)\b".to_string(),
            Rule::AllowDeadCode => r"#\s*\[\s*allow\s*\(\s*dead_code\s*\)\s*\]".to_string(),
            Rule::ForbiddenWord => format!(r"(//|/\*|///).*(?:{FORBIDDEN_WORDS})"),
            Rule::StarsInComment => r"(//|/\*).*\*\*".to_string(),
            Rule::AllUppercaseComment => r"(//|/\*|///).*".to_string(),
        }
    }

    fn explanation(self) -> &'static str {
        match self {
            Rule::UnderscorePrefix => {
                "Underscore-prefixed names are not allowed in this project.\n   Either use the binding (removing the underscore) or remove it completely."
            }
            Rule::AllowDeadCode => {
                "#[allow(dead_code)] attributes are STRICTLY FORBIDDEN in this project.\n   Either use the code or remove it completely."
            }
            Rule::ForbiddenWord => {
                "Comments narrating edits are STRICTLY FORBIDDEN in this project.\n   Remove them completely rather than commenting them out."
            }
            Rule::StarsInComment => {
                "The '**' pattern is not allowed in regular comments (it is allowed in doc comments)."
            }
            Rule::AllUppercaseComment => {
                "Comments where all alphabetic characters are uppercase are not allowed.\n   Strongly consider deleting the comment completely."
            }
        }
    }

    /// Second-stage filter over a line the regex already matched.
    fn is_violation(self, line: &str) -> bool {
        let trimmed = line.trim_start();
        match self {
            Rule::UnderscorePrefix => {
                let is_comment = trimmed.starts_with("//") || line.contains("/*");
                // Odd segments of a quote split lie inside string literals.
                let in_string = line
                    .split('"')
                    .enumerate()
                    .any(|(i, part)| i % 2 == 1 && part.contains('_'));
                !is_comment && !in_string
            }
            Rule::AllowDeadCode | Rule::ForbiddenWord => true,
            Rule::StarsInComment => !trimmed.starts_with("///"),
            Rule::AllUppercaseComment => {
                let comment = if let Some(rest) = trimmed.strip_prefix("///") {
                    rest
                } else if let Some(rest) = trimmed.strip_prefix("//") {
                    rest
                } else if let Some(idx) = line.find("/*") {
                    let rest = &line[idx + 2..];
                    rest.find("*/").map_or(rest, |end| &rest[..end])
                } else {
                    return false;
                };
                let mut letters = comment.chars().filter(|c| c.is_alphabetic()).peekable();
                letters.peek().is_some() && letters.all(char::is_uppercase)
            }
        }
    }
}

// Collects the offending lines of one file for one rule.
struct PolicyCollector {
    rule: Rule,
    file_path: PathBuf,
    violations: Vec<String>,
}

impl PolicyCollector {
    fn new(rule: Rule, file_path: &Path) -> Self {
        Self {
            rule,
            file_path: file_path.to_path_buf(),
            violations: Vec::new(),
        }
    }

    fn error_message(&self) -> Option<String> {
        if self.violations.is_empty() {
            return None;
        }
        let mut msg = format!(
            "\n❌ ERROR: Found {} policy violations in {}:\n",
            self.violations.len(),
            self.file_path.display()
        );
        for violation in &self.violations {
            msg.push_str(&format!("   {violation}\n"));
        }
        msg.push_str(&format!("\n⚠️ {}\n", self.rule.explanation()));
        Some(msg)
    }
}

impl Sink for PolicyCollector {
    type Error = std::io::Error;

    fn matched(&mut self, _: &Searcher, mat: &SinkMatch) -> Result<bool, Self::Error> {
        let line_number = mat.line_number().unwrap_or(0);
        let line_text = std::str::from_utf8(mat.bytes()).unwrap_or("").trim_end();
        if self.rule.is_violation(line_text) {
            self.violations.push(format!("{line_number}:{line_text}"));
        }
        Ok(true)
    }
}

fn rust_sources() -> Vec<PathBuf> {
    SOURCE_DIRS
        .iter()
        .flat_map(|dir| WalkDir::new(dir).into_iter().filter_map(|e| e.ok()))
        .filter(|e| e.path().extension().is_some_and(|ext| ext == "rs"))
        .map(|e| e.into_path())
        .collect()
}

fn enforce(rule: Rule, sources: &[PathBuf]) -> Result<(), Box<dyn Error>> {
    let matcher = RegexMatcher::new_line_matcher(&rule.pattern())?;
    let mut searcher = Searcher::new();
    for path in sources {
        let mut collector = PolicyCollector::new(rule, path);
        searcher.search_path(&matcher, path, &mut collector)?;
        if let Some(message) = collector.error_message() {
            return Err(message.into());
        }
    }
    Ok(())
}

fn main() {
    println!("cargo:rerun-if-changed=build.rs");
    for dir in SOURCE_DIRS {
        println!("cargo:rerun-if-changed={dir}");
    }

    let sources = rust_sources();
    let rules = [
        Rule::UnderscorePrefix,
        Rule::AllowDeadCode,
        Rule::ForbiddenWord,
        Rule::StarsInComment,
        Rule::AllUppercaseComment,
    ];
    for rule in rules {
        if let Err(e) = enforce(rule, &sources) {
            eprintln!("{e}");
            std::process::exit(1);
        }
    }
}
