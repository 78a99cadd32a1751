use super::model::SessionKey;
use super::stats::GRADE_MAX;
use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CellId {
    pub student_id: String,
    pub ec_id: String,
    pub session: SessionKey,
}

impl CellId {
    pub fn new(student_id: &str, ec_id: &str, session: SessionKey) -> Self {
        Self {
            student_id: student_id.to_string(),
            ec_id: ec_id.to_string(),
            session,
        }
    }
}

/// Edit lifecycle of one cell. Cells without an entry are in `Display`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "phase", rename_all = "camelCase")]
pub enum CellPhase {
    Display,
    Editing { draft: String, invalid: bool },
    Committing {
        #[serde(rename = "inFlight")]
        in_flight: usize,
    },
    RollingBack,
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum GradeInputError {
    #[error("not a number: {0:?}")]
    Unparsable(String),
    #[error("grade {0} is outside 0..=20")]
    OutOfRange(f64),
}

/// Parses what a user typed into a grade cell.
///
/// Empty input clears the cell (`Ok(None)`). A single decimal comma is read
/// as a decimal point. Anything non-finite or outside `[0, 20]` is rejected.
pub fn parse_grade_input(raw: &str) -> Result<Option<f64>, GradeInputError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Ok(None);
    }
    if trimmed.matches([',', '.']).count() > 1 {
        return Err(GradeInputError::Unparsable(trimmed.to_string()));
    }
    let normalized = trimmed.replace(',', ".");
    let value: f64 = normalized
        .parse()
        .map_err(|_| GradeInputError::Unparsable(trimmed.to_string()))?;
    if !value.is_finite() {
        return Err(GradeInputError::Unparsable(trimmed.to_string()));
    }
    Ok(Some(validate_grade(value)?))
}

pub fn validate_grade(value: f64) -> Result<f64, GradeInputError> {
    if value.is_nan() {
        return Err(GradeInputError::Unparsable("NaN".to_string()));
    }
    if !(0.0..=GRADE_MAX).contains(&value) {
        return Err(GradeInputError::OutOfRange(value));
    }
    // -0 is stored and shown as 0
    Ok(value + 0.0)
}

pub fn display_value(value: Option<f64>) -> String {
    match value {
        Some(v) => v.to_string(),
        None => "-".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_bounds_and_decimal_comma() {
        assert_eq!(parse_grade_input("0"), Ok(Some(0.0)));
        assert_eq!(parse_grade_input("20"), Ok(Some(20.0)));
        assert_eq!(parse_grade_input(" 12,5 "), Ok(Some(12.5)));
        assert_eq!(parse_grade_input("12.75"), Ok(Some(12.75)));
        for zero in ["-0", "-0,0"] {
            let v = parse_grade_input(zero).unwrap().unwrap();
            assert!(v.is_sign_positive(), "{}", zero);
            assert_eq!(display_value(Some(v)), "0");
        }
        assert!(validate_grade(-0.0).unwrap().is_sign_positive());
    }

    #[test]
    fn input_errors_are_std_errors() {
        let e: Box<dyn std::error::Error> = Box::new(GradeInputError::OutOfRange(21.0));
        assert_eq!(e.to_string(), "grade 21 is outside 0..=20");
        let e = crate::matrix::MatrixError::from(GradeInputError::Unparsable("x".into()));
        assert_eq!(e.to_string(), "invalid grade: not a number: \"x\"");
    }

    #[test]
    fn empty_input_clears() {
        assert_eq!(parse_grade_input(""), Ok(None));
        assert_eq!(parse_grade_input("   "), Ok(None));
    }

    #[test]
    fn rejects_out_of_range_and_garbage() {
        assert_eq!(parse_grade_input("20.01"), Err(GradeInputError::OutOfRange(20.01)));
        assert_eq!(parse_grade_input("-0.5"), Err(GradeInputError::OutOfRange(-0.5)));
        assert!(matches!(parse_grade_input("abc"), Err(GradeInputError::Unparsable(_))));
        assert!(matches!(parse_grade_input("NaN"), Err(GradeInputError::Unparsable(_))));
        assert!(matches!(parse_grade_input("inf"), Err(GradeInputError::Unparsable(_))));
        assert!(matches!(parse_grade_input("1,2,3"), Err(GradeInputError::Unparsable(_))));
        assert!(matches!(parse_grade_input("1.2,3"), Err(GradeInputError::Unparsable(_))));
    }

    #[test]
    fn every_step_in_range_is_accepted() {
        for tenth in 0..=200 {
            let g = tenth as f64 / 10.0;
            assert_eq!(parse_grade_input(&g.to_string()), Ok(Some(g)));
        }
    }

    #[test]
    fn display_uses_dash_for_missing() {
        assert_eq!(display_value(None), "-");
        assert_eq!(display_value(Some(12.0)), "12");
        assert_eq!(display_value(Some(12.5)), "12.5");
    }
}
