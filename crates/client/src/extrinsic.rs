//! Normalized extrinsic model shared by every decoder, plus the
//! user-facing filter applied when watching blocks.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;

/// How a parameter value should be interpreted downstream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ParamKind {
    Generic,
    Amount,
    Address,
}

impl fmt::Display for ParamKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParamKind::Generic => write!(f, "GENERIC"),
            ParamKind::Amount => write!(f, "AMOUNT"),
            ParamKind::Address => write!(f, "ADDRESS"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Param {
    pub name: String,
    pub value: String,
    pub kind: ParamKind,
}

impl Param {
    pub fn generic(name: impl Into<String>, value: impl fmt::Display) -> Self {
        Self {
            name: name.into(),
            value: value.to_string(),
            kind: ParamKind::Generic,
        }
    }

    pub fn amount(name: impl Into<String>, value: impl fmt::Display) -> Self {
        Self {
            name: name.into(),
            value: value.to_string(),
            kind: ParamKind::Amount,
        }
    }

    pub fn address(name: impl Into<String>, value: impl fmt::Display) -> Self {
        Self {
            name: name.into(),
            value: value.to_string(),
            kind: ParamKind::Address,
        }
    }

    pub fn is_amount(&self) -> bool {
        self.kind == ParamKind::Amount
    }

    pub fn is_address(&self) -> bool {
        self.kind == ParamKind::Address
    }
}

/// Where an extrinsic was decoded from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExtrinsicKind {
    Substrate,
    #[serde(rename = "EVM")]
    Evm,
}

impl fmt::Display for ExtrinsicKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExtrinsicKind::Substrate => write!(f, "Substrate"),
            ExtrinsicKind::Evm => write!(f, "EVM"),
        }
    }
}

/// A decoded extrinsic in chain-agnostic form.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Extrinsic {
    /// `<block>-<index>` of the originating extrinsic. Derived
    /// extrinsics (e.g. reward events) share the id of their origin.
    pub id: String,
    pub block: u64,
    pub module: String,
    pub function: String,
    pub kind: ExtrinsicKind,
    pub params: Vec<Param>,
}

impl Extrinsic {
    pub fn new(
        block: u64,
        index: u32,
        module: impl Into<String>,
        function: impl Into<String>,
        kind: ExtrinsicKind,
    ) -> Self {
        Self {
            id: format!("{block}-{index}"),
            block,
            module: module.into(),
            function: function.into(),
            kind,
            params: Vec::new(),
        }
    }

    pub fn with_id(
        id: impl Into<String>,
        block: u64,
        module: impl Into<String>,
        function: impl Into<String>,
        kind: ExtrinsicKind,
    ) -> Self {
        Self {
            id: id.into(),
            block,
            module: module.into(),
            function: function.into(),
            kind,
            params: Vec::new(),
        }
    }

    /// `Module.Function`, the form the method filter runs against.
    pub fn method(&self) -> String {
        format!("{}.{}", self.module, self.function)
    }

    /// Value of the first amount-kind parameter, zero when there is none.
    pub fn amount(&self) -> f64 {
        self.params
            .iter()
            .find(|p| p.is_amount())
            .and_then(|p| p.value.parse().ok())
            .unwrap_or(0.0)
    }

    pub fn param(&self, name: &str) -> Option<&str> {
        self.params
            .iter()
            .find(|p| p.name.eq_ignore_ascii_case(name))
            .map(|p| p.value.as_str())
    }

    pub fn remove_param(&mut self, name: &str) {
        self.params.retain(|p| !p.name.eq_ignore_ascii_case(name));
    }

    pub fn push(&mut self, param: Param) {
        self.params.push(param);
    }
}

impl fmt::Display for Extrinsic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let params = self
            .params
            .iter()
            .map(|p| format!("{}:{}={}", p.name, p.kind, p.value))
            .collect::<Vec<_>>()
            .join(",");
        write!(f, "#{}:{}:{}({})", self.id, self.kind, self.method(), params)
    }
}

/// Filter over decoded extrinsics with three optional clauses:
/// address pattern, method pattern and minimum amount.
#[derive(Debug)]
pub struct ExtrinsicFilter {
    address_pattern: Option<String>,
    address_regex: Option<Regex>,
    method_pattern: Option<String>,
    method_regex: Option<Regex>,
    min_amount: Option<f64>,
    match_all: bool,
}

impl ExtrinsicFilter {
    pub fn new(
        address_pattern: Option<&str>,
        method_pattern: Option<&str>,
        min_amount: Option<f64>,
        match_all: bool,
    ) -> Result<Self, regex::Error> {
        let address_pattern = address_pattern
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .map(str::to_owned);
        let method_pattern = method_pattern
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .map(str::to_owned);
        let address_regex = address_pattern
            .as_deref()
            .map(|p| Regex::new(&p.to_lowercase()))
            .transpose()?;
        let method_regex = method_pattern
            .as_deref()
            .map(|p| Regex::new(&format!("(?i){p}")))
            .transpose()?;
        Ok(Self {
            address_pattern,
            address_regex,
            method_pattern,
            method_regex,
            min_amount,
            match_all,
        })
    }

    /// True when every clause is vacuous or too weak to narrow the
    /// stream, so the filter would pass almost everything through.
    pub fn is_flood_filter(&self) -> bool {
        if self.address_pattern.as_deref().is_some_and(|p| p.len() > 2) {
            return false;
        }
        if self.method_pattern.as_deref().is_some_and(|p| p.len() > 2) {
            return false;
        }
        if self.min_amount.is_some_and(|m| m > 100.0) {
            return false;
        }
        true
    }

    pub fn matches(&self, extrinsic: &Extrinsic) -> bool {
        let address_match = match &self.address_regex {
            None => true,
            Some(re) => extrinsic.params.iter().any(|p| {
                let value = p.value.to_lowercase();
                value.starts_with("0x") && re.is_match(&value)
            }),
        };
        // Zero-amount extrinsics pass: the clause only rejects
        // extrinsics that carry an amount below the threshold.
        let amount = extrinsic.amount();
        let amount_match = match self.min_amount {
            None => true,
            Some(min) => min == 0.0 || amount == 0.0 || amount > min,
        };
        let method_match = match &self.method_regex {
            None => true,
            Some(re) => re.is_match(&extrinsic.method()),
        };
        let matches = [address_match, amount_match, method_match];
        if self.match_all {
            matches.iter().all(|m| *m)
        } else {
            matches.iter().any(|m| *m)
        }
    }
}

impl Default for ExtrinsicFilter {
    fn default() -> Self {
        Self {
            address_pattern: None,
            address_regex: None,
            method_pattern: None,
            method_regex: None,
            min_amount: None,
            match_all: true,
        }
    }
}

impl fmt::Display for ExtrinsicFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[address:{},method:{},amount:{},all:{}]",
            self.address_pattern.as_deref().unwrap_or("-"),
            self.method_pattern.as_deref().unwrap_or("-"),
            self.min_amount.unwrap_or(0.0),
            self.match_all
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn transfer(amount: &str) -> Extrinsic {
        let mut ex = Extrinsic::new(100, 2, "Balances", "Transfer", ExtrinsicKind::Substrate);
        ex.push(Param::address(
            "from",
            "0x44236223aB4291b93EEd10E4B511B37a398DEE55",
        ));
        ex.push(Param::address(
            "dest",
            "0x3Cd0A705a2DC65e5b1E1205896BaA2be8A07c6e0",
        ));
        ex.push(Param::amount("value", amount));
        ex
    }

    #[test]
    fn test_id_and_method() {
        let ex = transfer("12");
        assert_eq!(ex.id, "100-2");
        assert_eq!(ex.method(), "Balances.Transfer");
        assert_eq!(ex.amount(), 12.0);
    }

    #[test]
    fn test_amount_defaults_to_zero() {
        let ex = Extrinsic::new(1, 0, "System", "Remark", ExtrinsicKind::Substrate);
        assert_eq!(ex.amount(), 0.0);
    }

    #[test]
    fn test_param_lookup_is_case_insensitive() {
        let mut ex = transfer("1");
        assert_eq!(ex.param("DEST"), Some("0x3Cd0A705a2DC65e5b1E1205896BaA2be8A07c6e0"));
        ex.remove_param("Dest");
        assert_eq!(ex.param("dest"), None);
    }

    #[test]
    fn test_empty_filter_matches_everything() {
        let filter = ExtrinsicFilter::default();
        assert!(filter.matches(&transfer("5")));
        assert!(filter.is_flood_filter());
    }

    #[test]
    fn test_address_clause_only_looks_at_hex_values() {
        let filter = ExtrinsicFilter::new(Some("dee55"), None, None, true).unwrap();
        assert!(filter.matches(&transfer("5")));

        let mut no_hex = Extrinsic::new(1, 0, "Balances", "Transfer", ExtrinsicKind::Substrate);
        no_hex.push(Param::generic("memo", "dee55"));
        assert!(!filter.matches(&no_hex));
    }

    #[test]
    fn test_address_clause_is_case_insensitive() {
        let filter = ExtrinsicFilter::new(Some("0x44236223AB"), None, None, true).unwrap();
        assert!(filter.matches(&transfer("5")));
    }

    #[test]
    fn test_min_amount_lets_zero_amount_extrinsics_through() {
        let filter = ExtrinsicFilter::new(None, None, Some(1000.0), true).unwrap();
        let mut no_amount = Extrinsic::new(1, 0, "System", "Remark", ExtrinsicKind::Substrate);
        no_amount.push(Param::generic("remark", "0x00"));
        assert!(filter.matches(&no_amount));
        assert!(!filter.matches(&transfer("999")));
        assert!(filter.matches(&transfer("1001")));
    }

    #[test]
    fn test_method_clause_ignores_case() {
        let filter = ExtrinsicFilter::new(None, Some("balances.tra"), None, true).unwrap();
        assert!(filter.matches(&transfer("5")));
        let filter = ExtrinsicFilter::new(None, Some("staking"), None, true).unwrap();
        assert!(!filter.matches(&transfer("5")));
    }

    #[test]
    fn test_combined_method_and_amount_clauses() {
        let filter =
            ExtrinsicFilter::new(None, Some("Staking"), Some(5000.0), true).unwrap();
        let mut ex = Extrinsic::new(
            7,
            0,
            "ParachainStaking",
            "DelegatorBondMore",
            ExtrinsicKind::Substrate,
        );
        ex.push(Param::amount("more", "6000"));
        assert!(filter.matches(&ex));

        let above = ExtrinsicFilter::new(None, Some("Staking"), Some(6001.0), true).unwrap();
        assert!(!above.matches(&ex));
    }

    #[test]
    fn test_match_any() {
        let filter =
            ExtrinsicFilter::new(Some("nomatch"), Some("balances"), None, false).unwrap();
        assert!(filter.matches(&transfer("5")));
    }

    #[test]
    fn test_flood_filter_heuristic() {
        let narrow = ExtrinsicFilter::new(Some("0x4423"), None, None, true).unwrap();
        assert!(!narrow.is_flood_filter());
        let narrow = ExtrinsicFilter::new(None, Some("Transfer"), None, true).unwrap();
        assert!(!narrow.is_flood_filter());
        let narrow = ExtrinsicFilter::new(None, None, Some(500.0), true).unwrap();
        assert!(!narrow.is_flood_filter());

        let wide = ExtrinsicFilter::new(Some("0x"), None, Some(10.0), true).unwrap();
        assert!(wide.is_flood_filter());
    }

    #[test]
    fn test_display() {
        let ex = transfer("12");
        let text = ex.to_string();
        assert!(text.starts_with("#100-2:Substrate:Balances.Transfer("));
        assert!(text.contains("value:AMOUNT=12"));
    }
}
