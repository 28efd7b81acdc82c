//! Per-run constants broadcast into every enriched row.

use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use sumrec_core::normalize;

use crate::error::ReconError;

// ---------------------------------------------------------------------------
// Expiry
// ---------------------------------------------------------------------------

/// Trading-expiry labels offered on the form.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Expiry {
    #[serde(rename = "NIFTY 1DTE")]
    Nifty1Dte,
    #[serde(rename = "NIFTY 0DTE")]
    Nifty0Dte,
    #[serde(rename = "SENSEX 1DTE")]
    Sensex1Dte,
    #[serde(rename = "SENSEX 0DTE")]
    Sensex0Dte,
    #[serde(rename = "BANKNIFTY 1DTE")]
    BankNifty1Dte,
    #[serde(rename = "BANKNIFTY 0DTE")]
    BankNifty0Dte,
}

impl Expiry {
    pub const ALL: [Expiry; 6] = [
        Self::Nifty1Dte,
        Self::Nifty0Dte,
        Self::Sensex1Dte,
        Self::Sensex0Dte,
        Self::BankNifty1Dte,
        Self::BankNifty0Dte,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            Self::Nifty1Dte => "NIFTY 1DTE",
            Self::Nifty0Dte => "NIFTY 0DTE",
            Self::Sensex1Dte => "SENSEX 1DTE",
            Self::Sensex0Dte => "SENSEX 0DTE",
            Self::BankNifty1Dte => "BANKNIFTY 1DTE",
            Self::BankNifty0Dte => "BANKNIFTY 0DTE",
        }
    }
}

impl std::fmt::Display for Expiry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for Expiry {
    type Err = ReconError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let key = normalize(s);
        Self::ALL
            .into_iter()
            .find(|e| normalize(e.label()) == key)
            .ok_or_else(|| ReconError::InvalidConstant {
                field: "EXPIRY",
                value: s.trim().to_string(),
            })
    }
}

// ---------------------------------------------------------------------------
// Form input -> Constants
// ---------------------------------------------------------------------------

/// Values as typed on the form, untrimmed.
#[derive(Debug, Clone, Default)]
pub struct FormInput {
    pub algo: String,
    pub operator: String,
    pub expiry: String,
    pub remark: Option<String>,
}

/// Allowed ALGO / OPERATOR values. Empty lists mean free text.
#[derive(Debug, Clone, Default)]
pub struct FormChoices {
    pub algo: Vec<String>,
    pub operator: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Constants {
    pub server: String,
    pub algo: String,
    pub operator: String,
    pub expiry: Expiry,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remark_seed: Option<String>,
}

impl Constants {
    /// Validate the form and attach the derived SERVER value.
    pub fn resolve(form: &FormInput, server: String, choices: &FormChoices) -> Result<Self, ReconError> {
        let algo = required("ALGO", &form.algo, &choices.algo)?;
        let operator = required("OPERATOR", &form.operator, &choices.operator)?;
        let expiry: Expiry = form.expiry.parse()?;
        let remark_seed = form
            .remark
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string);

        Ok(Self { server, algo, operator, expiry, remark_seed })
    }

    /// A saved-MTM file must accompany ALGO 8 runs on a 1DTE expiry.
    pub fn requires_mtm_overlay(&self) -> bool {
        self.algo.trim() == "8" && self.expiry.label().to_ascii_lowercase().contains("1dte")
    }
}

fn required(field: &'static str, value: &str, choices: &[String]) -> Result<String, ReconError> {
    let value = value.trim();
    let invalid = || ReconError::InvalidConstant { field, value: value.to_string() };

    if value.is_empty() {
        return Err(invalid());
    }
    if !choices.is_empty() && !choices.iter().any(|c| c.trim() == value) {
        return Err(invalid());
    }
    Ok(value.to_string())
}

/// SERVER is the first word of an upload's file name (`VS11_users.csv` → `VS11`).
pub fn server_from_filename(name: &str) -> String {
    let stem = Path::new(name.trim())
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    stem.replace(['_', '-'], " ")
        .split_whitespace()
        .next()
        .unwrap_or("")
        .to_string()
}

/// First non-empty SERVER token across the given file names, in order.
pub fn derive_server<'a>(names: impl IntoIterator<Item = &'a str>) -> String {
    names
        .into_iter()
        .map(server_from_filename)
        .find(|s| !s.is_empty())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn form(algo: &str, operator: &str, expiry: &str) -> FormInput {
        FormInput {
            algo: algo.into(),
            operator: operator.into(),
            expiry: expiry.into(),
            remark: None,
        }
    }

    #[test]
    fn server_is_first_token_of_stem() {
        assert_eq!(server_from_filename("VS11_users.csv"), "VS11");
        assert_eq!(server_from_filename("VS12-summary export.xlsx"), "VS12");
        assert_eq!(server_from_filename("  plain.xlsx "), "plain");
        assert_eq!(server_from_filename(".xlsx"), ".xlsx");
        assert_eq!(derive_server(["___.csv", "VS9 summary.xlsx"]), "VS9");
    }

    #[test]
    fn expiry_parses_loosely() {
        assert_eq!("nifty 1dte".parse::<Expiry>().unwrap(), Expiry::Nifty1Dte);
        assert_eq!(" BANKNIFTY  0DTE ".parse::<Expiry>().unwrap(), Expiry::BankNifty0Dte);
        assert!("FINNIFTY 1DTE".parse::<Expiry>().is_err());
    }

    #[test]
    fn resolve_trims_and_validates() {
        let mut f = form(" 7 ", "GAURAVK", "SENSEX 0DTE");
        f.remark = Some("  ".into());
        let c = Constants::resolve(&f, "VS11".into(), &FormChoices::default()).unwrap();
        assert_eq!(c.algo, "7");
        assert_eq!(c.expiry, Expiry::Sensex0Dte);
        assert_eq!(c.remark_seed, None);

        let err = Constants::resolve(&form("", "X", "NIFTY 1DTE"), String::new(), &FormChoices::default()).unwrap_err();
        assert_eq!(err, ReconError::InvalidConstant { field: "ALGO", value: String::new() });
    }

    #[test]
    fn enumerated_choices_are_enforced() {
        let choices = FormChoices {
            algo: vec!["7".into(), "8".into()],
            operator: vec![],
        };
        assert!(Constants::resolve(&form("8", "op", "NIFTY 1DTE"), String::new(), &choices).is_ok());
        let err = Constants::resolve(&form("9", "op", "NIFTY 1DTE"), String::new(), &choices).unwrap_err();
        assert_eq!(err.to_string(), "invalid ALGO: '9'");
    }

    #[test]
    fn overlay_required_for_algo_8_on_1dte() {
        let c = |algo: &str, expiry: &str| {
            Constants::resolve(&form(algo, "op", expiry), String::new(), &FormChoices::default()).unwrap()
        };
        assert!(c("8", "NIFTY 1DTE").requires_mtm_overlay());
        assert!(c(" 8", "banknifty 1dte").requires_mtm_overlay());
        assert!(!c("8", "NIFTY 0DTE").requires_mtm_overlay());
        assert!(!c("A8", "SENSEX 1DTE").requires_mtm_overlay());
    }
}
