//! Scalar Derivation
//!
//! Turns simple types into [`ScalarRepr`]s: built-in kind, then the facets
//! of every restriction step from the built-in outwards. Results for named
//! types are memoized per compilation.

use chrono::{Duration, NaiveDate, NaiveDateTime};
use std::collections::HashMap;

use crate::config::CompilerConfig;
use crate::diagnostics::{DiagnosticCode, Diagnostics};
use crate::entity::{Choice, Literal, ScalarKind, ScalarRepr, Validator};
use crate::error::{CompileError, Result};
use crate::schema::{is_builtin, Facets, SchemaIndex, SimpleType};

/// Storage kind of an XSD built-in
pub fn builtin_kind(name: &str) -> Option<ScalarKind> {
    let kind = match name {
        "xs:base64Binary" | "xs:hexBinary" => ScalarKind::Binary,
        "xs:boolean" => ScalarKind::Boolean,
        "xs:byte" | "xs:short" => ScalarKind::SmallInteger,
        "xs:int" | "xs:integer" => ScalarKind::Integer,
        "xs:long" => ScalarKind::BigInteger,
        "xs:nonNegativeInteger" | "xs:positiveInteger" => ScalarKind::PositiveInteger,
        "xs:decimal" => ScalarKind::Decimal,
        "xs:double" | "xs:float" => ScalarKind::Float,
        "xs:date" | "xs:gYearMonth" => ScalarKind::Date,
        "xs:dateTime" => ScalarKind::DateTime,
        "xs:string" | "xs:token" | "xs:normalizedString" | "xs:anyURI" | "xs:ID" | "xs:IDREF" => {
            ScalarKind::Char
        }
        _ => return None,
    };
    Some(kind)
}

/// Memoizing simple type -> scalar deriver
#[derive(Debug, Default)]
pub struct ScalarDeriver {
    memo: HashMap<String, ScalarRepr>,
}

impl ScalarDeriver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Scalar for a built-in or named simple type
    pub fn named(
        &mut self,
        index: &SchemaIndex,
        config: &CompilerConfig,
        name: &str,
        diagnostics: &mut Diagnostics,
    ) -> Result<ScalarRepr> {
        if let Some(hit) = self.memo.get(name) {
            return Ok(hit.clone());
        }

        let repr = if let Some(over) = config.type_override(name) {
            let mut repr = ScalarRepr::new(over.kind.clone());
            repr.source_type = Some(name.to_string());
            repr.max_length = over.max_length;
            repr.max_digits = over.max_digits;
            repr.decimal_places = over.decimal_places;
            repr
        } else if is_builtin(name) {
            match builtin_kind(name) {
                Some(kind) => ScalarRepr::new(kind),
                None => {
                    diagnostics.warning(
                        name,
                        DiagnosticCode::UnknownBuiltin,
                        format!("no scalar mapping for {}, using text", name),
                    );
                    ScalarRepr::new(ScalarKind::Text)
                }
            }
        } else if let Some(st) = index.simple_type(name) {
            let mut repr = self.inline(index, config, st, diagnostics)?;
            repr.source_type = Some(name.to_string());
            repr
        } else if let Some(base) = index
            .find_complex(name)
            .and_then(|ct| ct.simple_content.as_ref())
            .map(|sc| sc.base.clone())
        {
            self.named(index, config, &base, diagnostics)?
        } else {
            return Err(CompileError::unresolved(
                name,
                index.complex_type_names(),
            ));
        };

        self.memo.insert(name.to_string(), repr.clone());
        Ok(repr)
    }

    /// Scalar for a (possibly anonymous) simple type definition
    pub fn inline(
        &mut self,
        index: &SchemaIndex,
        config: &CompilerConfig,
        st: &SimpleType,
        diagnostics: &mut Diagnostics,
    ) -> Result<ScalarRepr> {
        let mut repr = self.named(index, config, &st.base, diagnostics)?;
        repr.source_type = None;
        let label = st.name.as_deref().unwrap_or(&st.base);
        apply_facets(&mut repr, &st.facets, config.compiler.max_length_factor, label)?;
        Ok(repr)
    }
}

/// Apply one restriction step's facets on top of the inherited scalar
fn apply_facets(repr: &mut ScalarRepr, facets: &Facets, factor: u32, label: &str) -> Result<()> {
    if let Some(value) = &facets.min_inclusive {
        repr.validators.push(bound(&repr.kind, value, false, true, label)?);
    }
    if let Some(value) = &facets.min_exclusive {
        repr.validators.push(bound(&repr.kind, value, true, true, label)?);
    }
    if let Some(value) = &facets.max_inclusive {
        repr.validators.push(bound(&repr.kind, value, false, false, label)?);
    }
    if let Some(value) = &facets.max_exclusive {
        repr.validators.push(bound(&repr.kind, value, true, false, label)?);
    }

    match facets.min_length {
        Some(1) => repr.not_blank = true,
        Some(n) if n > 1 => repr.validators.push(Validator::MinLength(n)),
        _ => {}
    }

    if !facets.patterns.is_empty() && !repr.kind.is_numeric() {
        let regex = match &facets.patterns[..] {
            [single] => single.clone(),
            many => many
                .iter()
                .map(|p| format!("(?:{})", p))
                .collect::<Vec<_>>()
                .join("|"),
        };
        repr.validators.push(Validator::Regex(regex));
    }

    if is_length_bounded(&repr.kind) {
        let explicit = facets
            .length
            .or(facets.max_length)
            .or_else(|| facets.patterns.first().and_then(|p| digit_pattern_length(p)));
        if let Some(length) = explicit {
            let scaled = length.checked_mul(factor).ok_or_else(|| CompileError::InvalidDefault {
                path: label.to_string(),
                value: length.to_string(),
                base: repr.kind.to_string(),
            })?;
            repr.max_length = Some(scaled);
        } else if !facets.enumerations.is_empty() {
            repr.max_length = facets
                .enumerations
                .iter()
                .map(|e| e.value.chars().count() as u32)
                .max();
        }
    }

    if !facets.enumerations.is_empty() {
        repr.choices = facets
            .enumerations
            .iter()
            .map(|e| Choice {
                value: e.value.clone(),
                label: e
                    .documentation
                    .as_deref()
                    .map(normalize_doc)
                    .filter(|d| !d.is_empty())
                    .unwrap_or_else(|| e.value.clone()),
            })
            .collect();
    }

    if let Some(places) = facets.fraction_digits {
        repr.decimal_places = Some(places);
    }
    if let Some(total) = facets.total_digits {
        match repr.kind {
            ScalarKind::Decimal => repr.max_digits = Some(total),
            ScalarKind::SmallInteger if total > 9 => repr.kind = ScalarKind::BigInteger,
            ScalarKind::SmallInteger if total > 4 => repr.kind = ScalarKind::Integer,
            ScalarKind::Integer | ScalarKind::PositiveInteger if total > 9 => {
                repr.kind = ScalarKind::BigInteger
            }
            _ => {}
        }
    }

    Ok(())
}

fn is_length_bounded(kind: &ScalarKind) -> bool {
    matches!(kind, ScalarKind::Char | ScalarKind::Text | ScalarKind::Custom(_))
}

/// Length implied by a pattern of the form `\d{n}` or `\d{m,n}`
fn digit_pattern_length(pattern: &str) -> Option<u32> {
    let inner = pattern.strip_prefix(r"\d{")?.strip_suffix('}')?;
    inner.rsplit(',').next()?.trim().parse().ok()
}

/// Range validator; exclusive integer and date bounds become inclusive
fn bound(kind: &ScalarKind, raw: &str, exclusive: bool, lower: bool, label: &str) -> Result<Validator> {
    let invalid = || CompileError::InvalidDefault {
        path: label.to_string(),
        value: raw.to_string(),
        base: kind.to_string(),
    };
    let step: i64 = if lower { 1 } else { -1 };
    let value = raw.trim();

    let (literal, exclusive) = if kind.is_integer() {
        let n: i64 = value.parse().map_err(|_| invalid())?;
        let n = if exclusive { n.checked_add(step).ok_or_else(invalid)? } else { n };
        (Literal::Integer(n), false)
    } else {
        match kind {
            ScalarKind::Date => {
                let date = parse_date(value).ok_or_else(invalid)?;
                let date = if exclusive {
                    date.checked_add_signed(Duration::days(step)).ok_or_else(invalid)?
                } else {
                    date
                };
                (Literal::Date(date), false)
            }
            ScalarKind::DateTime => {
                let dt = NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S").map_err(|_| invalid())?;
                let dt = if exclusive {
                    dt.checked_add_signed(Duration::seconds(step)).ok_or_else(invalid)?
                } else {
                    dt
                };
                (Literal::DateTime(dt), false)
            }
            ScalarKind::Decimal => {
                value.parse::<f64>().map_err(|_| invalid())?;
                (Literal::Decimal(value.to_string()), exclusive)
            }
            ScalarKind::Float => (Literal::Float(value.parse().map_err(|_| invalid())?), exclusive),
            _ => (Literal::Text(value.to_string()), exclusive),
        }
    };

    Ok(if lower {
        Validator::MinValue { value: literal, exclusive }
    } else {
        Validator::MaxValue { value: literal, exclusive }
    })
}

fn parse_date(value: &str) -> Option<NaiveDate> {
    let head = value.get(..10).unwrap_or(value);
    NaiveDate::parse_from_str(head, "%Y-%m-%d").ok()
}

/// Bounded text without a usable length becomes unbounded text
pub fn finalize(mut repr: ScalarRepr, text_threshold: u32) -> ScalarRepr {
    if repr.kind == ScalarKind::Char && repr.max_length.map(|l| l > text_threshold).unwrap_or(true) {
        repr.kind = ScalarKind::Text;
    }
    repr
}

/// Parse a default/fixed value according to the primitive base type
pub fn parse_default(primitive: &str, raw: &str, path: &str) -> Result<Literal> {
    let invalid = || CompileError::InvalidDefault {
        path: path.to_string(),
        value: raw.to_string(),
        base: primitive.to_string(),
    };
    let value = raw.trim();

    let literal = match primitive {
        "xs:boolean" => match value {
            "true" | "1" => Literal::Boolean(true),
            "false" | "0" => Literal::Boolean(false),
            _ => return Err(invalid()),
        },
        "xs:date" => Literal::Date(NaiveDate::parse_from_str(value, "%Y-%m-%d").map_err(|_| invalid())?),
        "xs:gYearMonth" => Literal::Date(
            NaiveDate::parse_from_str(&format!("{}-01", value), "%Y-%m-%d").map_err(|_| invalid())?,
        ),
        "xs:dateTime" => Literal::DateTime(
            NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S").map_err(|_| invalid())?,
        ),
        "xs:double" | "xs:float" => Literal::Float(value.parse().map_err(|_| invalid())?),
        "xs:decimal" => {
            value.parse::<f64>().map_err(|_| invalid())?;
            Literal::Decimal(value.to_string())
        }
        "xs:byte" | "xs:short" | "xs:int" | "xs:integer" | "xs:long" | "xs:nonNegativeInteger"
        | "xs:positiveInteger" => Literal::Integer(value.parse().map_err(|_| invalid())?),
        "xs:string" | "xs:normalizedString" | "xs:anyURI" => Literal::Text(raw.to_string()),
        "xs:token" => Literal::Text(raw.split_whitespace().collect()),
        _ => Literal::Text(raw.to_string()),
    };
    Ok(literal)
}

/// Collapse runs of spaces, trim, and drop a trailing period
pub fn normalize_doc(doc: &str) -> String {
    let mut out = String::with_capacity(doc.len());
    let mut prev_space = false;
    for c in doc.trim().chars() {
        if c == ' ' {
            if !prev_space {
                out.push(c);
            }
            prev_space = true;
        } else {
            out.push(c);
            prev_space = false;
        }
    }
    let out = out.replace(" )", ")").replace("\n\n", "\n");
    out.trim_end_matches('.').to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn index(json: &str) -> SchemaIndex {
        SchemaIndex::from_json(json).unwrap()
    }

    fn derive(index: &SchemaIndex, name: &str) -> ScalarRepr {
        let config = CompilerConfig::default();
        let mut diags = Diagnostics::new();
        ScalarDeriver::new().named(index, &config, name, &mut diags).unwrap()
    }

    #[test]
    fn test_digit_pattern_implies_length() {
        let index = index(r#"{"simple_types": [
            {"name": "OrderNumber", "base": "xs:string", "facets": {"patterns": ["\\d{4}"]}}
        ]}"#);
        let repr = derive(&index, "OrderNumber");
        assert_eq!(repr.kind, ScalarKind::Char);
        assert_eq!(repr.max_length, Some(4));
        assert_eq!(repr.validators, vec![Validator::Regex(r"\d{4}".to_string())]);
        assert_eq!(repr.source_type.as_deref(), Some("OrderNumber"));
    }

    #[test]
    fn test_enumeration_choices_and_length() {
        let index = index(r#"{"simple_types": [
            {"name": "Size", "base": "xs:token", "facets": {"enumerations": [
                {"value": "S", "documentation": "Small."},
                {"value": "XL"}
            ]}}
        ]}"#);
        let repr = derive(&index, "Size");
        assert_eq!(repr.max_length, Some(2));
        assert_eq!(
            repr.choices,
            vec![
                Choice { value: "S".into(), label: "Small".into() },
                Choice { value: "XL".into(), label: "XL".into() },
            ]
        );
    }

    #[test]
    fn test_restriction_chain_inherits_facets() {
        let index = index(r#"{"simple_types": [
            {"name": "Code", "base": "ShortText", "facets": {"min_length": 1}},
            {"name": "ShortText", "base": "xs:string", "facets": {"max_length": 20}}
        ]}"#);
        let repr = derive(&index, "Code");
        assert_eq!(repr.max_length, Some(20));
        assert!(repr.not_blank);
    }

    #[test]
    fn test_integer_promotion_and_digits() {
        let index = index(r#"{"simple_types": [
            {"name": "Big", "base": "xs:integer", "facets": {"total_digits": 12, "patterns": ["\\d+"]}},
            {"name": "Money", "base": "xs:decimal", "facets": {"total_digits": 10, "fraction_digits": 2}}
        ]}"#);
        let big = derive(&index, "Big");
        assert_eq!(big.kind, ScalarKind::BigInteger);
        assert!(big.validators.is_empty());

        let money = derive(&index, "Money");
        assert_eq!(money.max_digits, Some(10));
        assert_eq!(money.decimal_places, Some(2));
    }

    #[test]
    fn test_exclusive_bounds_adjusted() {
        let index = index(r#"{"simple_types": [
            {"name": "Age", "base": "xs:int", "facets": {"min_exclusive": "0", "max_inclusive": "150"}},
            {"name": "Since", "base": "xs:date", "facets": {"min_exclusive": "2000-01-01"}}
        ]}"#);
        let age = derive(&index, "Age");
        assert_eq!(
            age.validators,
            vec![
                Validator::MinValue { value: Literal::Integer(1), exclusive: false },
                Validator::MaxValue { value: Literal::Integer(150), exclusive: false },
            ]
        );

        let since = derive(&index, "Since");
        assert_eq!(
            since.validators,
            vec![Validator::MinValue {
                value: Literal::Date(NaiveDate::from_ymd_opt(2000, 1, 2).unwrap()),
                exclusive: false,
            }]
        );
    }

    #[test]
    fn test_overflowing_facets_rejected() {
        let index = index(r#"{"simple_types": [
            {"name": "Huge", "base": "xs:long", "facets": {"min_exclusive": "9223372036854775807"}},
            {"name": "Below", "base": "xs:long", "facets": {"max_exclusive": "-9223372036854775808"}},
            {"name": "Wide", "base": "xs:string", "facets": {"max_length": 4294967295}}
        ]}"#);
        let config = CompilerConfig::from_toml_str(
            r#"
            [compiler]
            max_length_factor = 2
            "#,
        )
        .unwrap();

        for name in ["Huge", "Below", "Wide"] {
            let mut diags = Diagnostics::new();
            let err = ScalarDeriver::new()
                .named(&index, &config, name, &mut diags)
                .unwrap_err();
            assert!(
                matches!(err, CompileError::InvalidDefault { ref path, .. } if path == name),
                "unexpected error for {}: {}",
                name,
                err
            );
        }
    }

    #[test]
    fn test_unknown_builtin_warns() {
        let index = SchemaIndex::default();
        let config = CompilerConfig::default();
        let mut diags = Diagnostics::new();
        let repr = ScalarDeriver::new()
            .named(&index, &config, "xs:duration", &mut diags)
            .unwrap();
        assert_eq!(repr.kind, ScalarKind::Text);
        assert_eq!(diags.with_code(DiagnosticCode::UnknownBuiltin).count(), 1);
    }

    #[test]
    fn test_finalize_text_threshold() {
        let mut repr = ScalarRepr::new(ScalarKind::Char);
        assert_eq!(finalize(repr.clone(), 500).kind, ScalarKind::Text);
        repr.max_length = Some(600);
        assert_eq!(finalize(repr.clone(), 500).kind, ScalarKind::Text);
        repr.max_length = Some(40);
        assert_eq!(finalize(repr, 500).kind, ScalarKind::Char);
    }

    #[test]
    fn test_parse_default() {
        assert_eq!(parse_default("xs:boolean", "true", "a").unwrap(), Literal::Boolean(true));
        assert_eq!(
            parse_default("xs:gYearMonth", "2020-05", "a").unwrap(),
            Literal::Date(NaiveDate::from_ymd_opt(2020, 5, 1).unwrap())
        );
        assert_eq!(parse_default("xs:token", " A B ", "a").unwrap(), Literal::Text("AB".into()));
        assert!(matches!(
            parse_default("xs:int", "many", "Order.count"),
            Err(CompileError::InvalidDefault { .. })
        ));
    }

    #[test]
    fn test_normalize_doc() {
        assert_eq!(normalize_doc("  The   order number. "), "The order number");
    }
}
