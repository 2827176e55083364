//! Diagnostics
//!
//! Collects warnings raised while compiling. Warnings never abort a run;
//! anything that would produce a wrong graph is a [`crate::CompileError`]
//! instead.

use serde::{Deserialize, Serialize};
use std::fmt;

// =============================================================================
// Diagnostic Codes
// =============================================================================

/// Diagnostic code for categorizing issues
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DiagnosticCode {
    // === Naming ===
    /// No naming rule matched; an entity name was synthesized from the path
    AutoNamedEntity,

    // === Relations ===
    /// N:many relation without an unbounded particle, treated as unbounded
    AssumedUnbounded,
    /// Relation target entity was never built
    UnresolvedDependency,

    // === Flattening ===
    /// Flatten hit a simple-content type and produced its wrapped scalar
    FlattenReinterpreted,
    /// Flatten requested on an element without a complex type
    FlattenWithoutComplexType,
    /// reference_extension_fields matched a type without an extension
    ReferenceExtensionFallback,

    // === Types ===
    /// complexContent extension adds nothing to its base
    EmptyExtension,
    /// Complex type without sequence, choice or extension
    MissingContent,
    /// Built-in type with no scalar mapping
    UnknownBuiltin,
}

impl DiagnosticCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AutoNamedEntity => "W001",
            Self::AssumedUnbounded => "W002",
            Self::UnresolvedDependency => "W003",
            Self::FlattenReinterpreted => "W004",
            Self::FlattenWithoutComplexType => "W005",
            Self::ReferenceExtensionFallback => "W006",
            Self::EmptyExtension => "W007",
            Self::MissingContent => "W008",
            Self::UnknownBuiltin => "W009",
        }
    }

    pub fn severity(&self) -> Severity {
        match self {
            Self::EmptyExtension | Self::FlattenReinterpreted => Severity::Info,
            _ => Severity::Warning,
        }
    }
}

impl fmt::Display for DiagnosticCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// =============================================================================
// Severity
// =============================================================================

/// Diagnostic severity level
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Severity {
    Info,
    Warning,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Info => write!(f, "info"),
            Self::Warning => write!(f, "warning"),
        }
    }
}

// =============================================================================
// Diagnostic Item
// =============================================================================

/// A single diagnostic item
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiagnosticItem {
    /// Dotted source path the diagnostic is about
    pub path: String,
    /// Diagnostic code
    pub code: DiagnosticCode,
    /// Human-readable message
    pub message: String,
    /// Additional context (suggested rules, related types)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub context: Vec<String>,
}

impl DiagnosticItem {
    pub fn new(path: impl Into<String>, code: DiagnosticCode, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            code,
            message: message.into(),
            context: Vec::new(),
        }
    }

    pub fn with_context(mut self, ctx: impl Into<String>) -> Self {
        self.context.push(ctx.into());
        self
    }

    pub fn severity(&self) -> Severity {
        self.code.severity()
    }
}

impl fmt::Display for DiagnosticItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] {}: {} ({})",
            self.code,
            self.code.severity(),
            self.message,
            self.path
        )?;

        for ctx in &self.context {
            write!(f, "\n  - {}", ctx)?;
        }

        Ok(())
    }
}

// =============================================================================
// Diagnostics Collection
// =============================================================================

/// Collection of diagnostics from one compilation
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Diagnostics {
    items: Vec<DiagnosticItem>,
}

impl Diagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a diagnostic item, mirroring it to the tracing log
    pub fn push(&mut self, item: DiagnosticItem) {
        match item.severity() {
            Severity::Info => tracing::info!(code = %item.code, path = %item.path, "{}", item.message),
            Severity::Warning => tracing::warn!(code = %item.code, path = %item.path, "{}", item.message),
        }
        self.items.push(item);
    }

    /// Add a warning
    pub fn warning(&mut self, path: impl Into<String>, code: DiagnosticCode, message: impl Into<String>) {
        self.push(DiagnosticItem::new(path, code, message));
    }

    /// Add diagnostic for an entity named without a rule
    pub fn auto_named(&mut self, type_path: &str, entity: &str) {
        self.push(
            DiagnosticItem::new(
                type_path,
                DiagnosticCode::AutoNamedEntity,
                format!("Automatic entity name: {}", entity),
            )
            .with_context(format!(
                "Consider adding [[type_map]] pattern = \"{}\" to the configuration",
                regex::escape(type_path)
            )),
        );
    }

    /// Add diagnostic for an N:many relation with no unbounded particle
    pub fn assumed_unbounded(&mut self, path: &str) {
        self.push(DiagnosticItem::new(
            path,
            DiagnosticCode::AssumedUnbounded,
            "no maxOccurs=unbounded found, pretending it's unbounded",
        ));
    }

    /// Check if there are any warnings
    pub fn has_warnings(&self) -> bool {
        self.items.iter().any(|i| i.severity() == Severity::Warning)
    }

    /// Get all warnings
    pub fn warnings(&self) -> impl Iterator<Item = &DiagnosticItem> {
        self.items.iter().filter(|i| i.severity() == Severity::Warning)
    }

    /// Get all items with the given code
    pub fn with_code(&self, code: DiagnosticCode) -> impl Iterator<Item = &DiagnosticItem> {
        self.items.iter().filter(move |i| i.code == code)
    }

    /// Get all items
    pub fn all(&self) -> &[DiagnosticItem] {
        &self.items
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn warning_count(&self) -> usize {
        self.warnings().count()
    }

    /// Format all diagnostics for display
    pub fn format_all(&self) -> String {
        let mut output = String::new();

        for item in &self.items {
            output.push_str(&format!("{}\n", item));
        }

        if !self.is_empty() {
            output.push_str(&format!("\n{} warning(s)\n", self.warning_count()));
        }

        output
    }
}

impl fmt::Display for Diagnostics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.format_all())
    }
}

impl<'a> IntoIterator for &'a Diagnostics {
    type Item = &'a DiagnosticItem;
    type IntoIter = std::slice::Iter<'a, DiagnosticItem>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.iter()
    }
}
