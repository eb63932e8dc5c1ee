use serde_json::json;

/// Raw exam marks sum to 200 points; stored totals are normalized to 100.
pub const TOTAL_DIVISOR: f64 = 2.0;
/// Fixed pass threshold on the normalized total. Not configurable per
/// subject or class.
pub const PASS_THRESHOLD: f64 = 35.0;

pub const UT_MAX: f64 = 25.0;
pub const TERMINAL_MAX: f64 = 50.0;
/// Cap on each annual paper component individually, and on their sum.
pub const ANNUAL_MAX: f64 = 100.0;

/// Canonical component field names, in spreadsheet column order. These are
/// also the names used in missing-field messages.
pub const COMPONENT_FIELDS: [&str; 5] = [
    "ut1",
    "ut2",
    "terminal",
    "annual_theory",
    "annual_practical",
];

/// One subject-result's component marks as they arrive from a form post or
/// a spreadsheet row: untrimmed strings, possibly absent. Coercion and range
/// checking happen in [`validate`], nowhere later.
#[derive(Debug, Clone, Default)]
pub struct RawMarks {
    pub ut1: Option<String>,
    pub ut2: Option<String>,
    pub terminal: Option<String>,
    pub annual_theory: Option<String>,
    pub annual_practical: Option<String>,
}

impl RawMarks {
    /// Reads component fields from a JSON object using the wire (camelCase)
    /// key names. Numbers and non-empty strings are accepted; anything else
    /// counts as absent.
    pub fn from_json(obj: &serde_json::Value) -> Self {
        RawMarks {
            ut1: json_field(obj, "ut1"),
            ut2: json_field(obj, "ut2"),
            terminal: json_field(obj, "terminal"),
            annual_theory: json_field(obj, "annualTheory"),
            annual_practical: json_field(obj, "annualPractical"),
        }
    }

    fn get(&self, field: &str) -> Option<&String> {
        match field {
            "ut1" => self.ut1.as_ref(),
            "ut2" => self.ut2.as_ref(),
            "terminal" => self.terminal.as_ref(),
            "annual_theory" => self.annual_theory.as_ref(),
            "annual_practical" => self.annual_practical.as_ref(),
            _ => None,
        }
    }
}

fn json_field(obj: &serde_json::Value, key: &str) -> Option<String> {
    match obj.get(key) {
        Some(serde_json::Value::Number(n)) => Some(n.to_string()),
        Some(serde_json::Value::String(s)) => {
            let t = s.trim();
            if t.is_empty() {
                None
            } else {
                Some(t.to_string())
            }
        }
        _ => None,
    }
}

/// Validated component marks. Construction goes through [`validate`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Components {
    pub ut1: f64,
    pub ut2: f64,
    pub terminal: f64,
    pub annual_theory: f64,
    pub annual_practical: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub enum MarkError {
    /// Required fields absent from the input. `fields` lists every missing
    /// name, not just the first.
    Missing { fields: Vec<String> },
    /// A present field that does not parse as a number.
    NotNumeric { field: &'static str },
    /// A component outside its fixed bounds. First violation wins.
    Range { message: &'static str },
}

impl MarkError {
    pub fn message(&self) -> String {
        match self {
            MarkError::Missing { fields } => {
                format!("Missing required fields: {}", fields.join(", "))
            }
            MarkError::NotNumeric { field } => format!("{} must be a number", field),
            MarkError::Range { message } => (*message).to_string(),
        }
    }

    pub fn details(&self) -> Option<serde_json::Value> {
        match self {
            MarkError::Missing { fields } => Some(json!({ "missing": fields })),
            MarkError::NotNumeric { field } => Some(json!({ "field": field })),
            MarkError::Range { .. } => None,
        }
    }
}

/// Checks one record's component marks against the fixed ranges.
///
/// `extra_missing` carries context fields the caller requires beyond the five
/// components (the bulk-upload path passes `roll_number` when absent) so a
/// single missing-fields message covers the whole row.
pub fn validate(raw: &RawMarks, extra_missing: &[&str]) -> Result<Components, MarkError> {
    let mut missing: Vec<String> = extra_missing.iter().map(|s| s.to_string()).collect();
    for field in COMPONENT_FIELDS {
        if raw.get(field).is_none() {
            missing.push(field.to_string());
        }
    }
    if !missing.is_empty() {
        return Err(MarkError::Missing { fields: missing });
    }

    let ut1 = coerce("ut1", raw.ut1.as_deref())?;
    let ut2 = coerce("ut2", raw.ut2.as_deref())?;
    let terminal = coerce("terminal", raw.terminal.as_deref())?;
    let annual_theory = coerce("annual_theory", raw.annual_theory.as_deref())?;
    let annual_practical = coerce("annual_practical", raw.annual_practical.as_deref())?;

    if !(0.0..=UT_MAX).contains(&ut1) {
        return Err(MarkError::Range {
            message: "UT1 marks must be between 0 and 25",
        });
    }
    if !(0.0..=UT_MAX).contains(&ut2) {
        return Err(MarkError::Range {
            message: "UT2 marks must be between 0 and 25",
        });
    }
    if !(0.0..=TERMINAL_MAX).contains(&terminal) {
        return Err(MarkError::Range {
            message: "terminal marks must be between 0 and 50",
        });
    }
    // The annual paper is split into theory and practical; each part and
    // their sum share the 100-mark cap. The sum check is skipped while both
    // are zero so partially filled drafts keep saving.
    if !(0.0..=ANNUAL_MAX).contains(&annual_theory)
        || !(0.0..=ANNUAL_MAX).contains(&annual_practical)
    {
        return Err(MarkError::Range {
            message: "Annual marks must be between 0 and 100",
        });
    }
    if annual_theory != 0.0 || annual_practical != 0.0 {
        let annual = annual_theory + annual_practical;
        if !(0.0..=ANNUAL_MAX).contains(&annual) {
            return Err(MarkError::Range {
                message: "Annual marks must be between 0 and 100",
            });
        }
    }

    Ok(Components {
        ut1,
        ut2,
        terminal,
        annual_theory,
        annual_practical,
    })
}

fn coerce(field: &'static str, value: Option<&str>) -> Result<f64, MarkError> {
    let Some(text) = value else {
        return Err(MarkError::Missing {
            fields: vec![field.to_string()],
        });
    };
    text.trim()
        .parse::<f64>()
        .map_err(|_| MarkError::NotNumeric { field })
}

/// Lifecycle of a buffered (teacher-entered) result. Published results have
/// no status; a row in the results table is published by definition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DraftStatus {
    Draft,
    Submitted,
    Approved,
}

impl DraftStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            DraftStatus::Draft => "draft",
            DraftStatus::Submitted => "submitted",
            DraftStatus::Approved => "approved",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "draft" => Some(DraftStatus::Draft),
            "submitted" => Some(DraftStatus::Submitted),
            "approved" => Some(DraftStatus::Approved),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Remark {
    Pass,
    Fail,
}

impl Remark {
    pub fn as_str(self) -> &'static str {
        match self {
            Remark::Pass => "Pass",
            Remark::Fail => "Fail",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Aggregate {
    pub total: f64,
    pub remark: Remark,
}

/// Computes the normalized total and pass/fail remark from validated
/// components. Plain f64 division, no rounding.
pub fn aggregate(c: &Components) -> Aggregate {
    let total =
        (c.ut1 + c.ut2 + c.terminal + c.annual_theory + c.annual_practical) / TOTAL_DIVISOR;
    let remark = if total >= PASS_THRESHOLD {
        Remark::Pass
    } else {
        Remark::Fail
    };
    Aggregate { total, remark }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(ut1: &str, ut2: &str, terminal: &str, theory: &str, practical: &str) -> RawMarks {
        RawMarks {
            ut1: Some(ut1.to_string()),
            ut2: Some(ut2.to_string()),
            terminal: Some(terminal.to_string()),
            annual_theory: Some(theory.to_string()),
            annual_practical: Some(practical.to_string()),
        }
    }

    #[test]
    fn aggregate_halves_raw_total() {
        let c = validate(&raw("20", "18", "40", "60", "25"), &[]).expect("valid");
        let a = aggregate(&c);
        assert_eq!(a.total, 81.5);
        assert_eq!(a.remark, Remark::Pass);
    }

    #[test]
    fn aggregate_fails_below_threshold() {
        let c = validate(&raw("5", "5", "10", "10", "0"), &[]).expect("valid");
        let a = aggregate(&c);
        assert_eq!(a.total, 15.0);
        assert_eq!(a.remark, Remark::Fail);
    }

    #[test]
    fn threshold_is_inclusive() {
        // 15+15+20+15+5 = 70, total 35.0 exactly.
        let c = validate(&raw("15", "15", "20", "15", "5"), &[]).expect("valid");
        assert_eq!(aggregate(&c).remark, Remark::Pass);
    }

    #[test]
    fn ut_range_violations_fail_fast() {
        let e = validate(&raw("26", "99", "99", "99", "99"), &[]).expect_err("range");
        assert_eq!(e.message(), "UT1 marks must be between 0 and 25");

        let e = validate(&raw("25", "-1", "40", "60", "25"), &[]).expect_err("range");
        assert_eq!(e.message(), "UT2 marks must be between 0 and 25");

        let e = validate(&raw("25", "25", "51", "60", "25"), &[]).expect_err("range");
        assert_eq!(e.message(), "terminal marks must be between 0 and 50");
    }

    #[test]
    fn annual_sum_bounded_regardless_of_other_fields() {
        let e = validate(&raw("0", "0", "0", "80", "30"), &[]).expect_err("sum 110");
        assert_eq!(e.message(), "Annual marks must be between 0 and 100");
    }

    #[test]
    fn annual_components_individually_bounded() {
        let e = validate(&raw("0", "0", "0", "-5", "5"), &[]).expect_err("negative theory");
        assert_eq!(e.message(), "Annual marks must be between 0 and 100");
    }

    #[test]
    fn annual_sum_check_skipped_when_both_zero() {
        let c = validate(&raw("10", "10", "20", "0", "0"), &[]).expect("valid");
        assert_eq!(c.annual_theory, 0.0);
        assert_eq!(c.annual_practical, 0.0);
    }

    #[test]
    fn missing_fields_listed_together() {
        let mut r = raw("20", "18", "40", "60", "25");
        r.ut2 = None;
        r.annual_practical = None;
        let e = validate(&r, &["roll_number"]).expect_err("missing");
        assert_eq!(
            e.message(),
            "Missing required fields: roll_number, ut2, annual_practical"
        );
    }

    #[test]
    fn non_numeric_field_is_rejected() {
        let e = validate(&raw("20", "18", "forty", "60", "25"), &[]).expect_err("nan");
        assert_eq!(e.message(), "terminal must be a number");
    }

    #[test]
    fn from_json_accepts_numbers_and_strings() {
        let obj = serde_json::json!({
            "ut1": 20,
            "ut2": "18",
            "terminal": 40.5,
            "annualTheory": "  60 ",
            "annualPractical": ""
        });
        let r = RawMarks::from_json(&obj);
        assert_eq!(r.ut1.as_deref(), Some("20"));
        assert_eq!(r.ut2.as_deref(), Some("18"));
        assert_eq!(r.terminal.as_deref(), Some("40.5"));
        assert_eq!(r.annual_theory.as_deref(), Some("60"));
        assert!(r.annual_practical.is_none());
    }
}
