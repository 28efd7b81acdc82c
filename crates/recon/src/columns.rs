//! Column names the enrichment reads or writes.

pub const ALLOCATION: &str = "ALLOCATION";
pub const MAX_LOSS: &str = "MAX_LOSS";
pub const SERVER: &str = "SERVER";
pub const ALGO: &str = "ALGO";
pub const OPERATOR: &str = "OPERATOR";
pub const EXPIRY: &str = "EXPIRY";
pub const REMARK: &str = "REMARK";
pub const MTM_ALL: &str = "MTM (All)";

/// Literal identifier headers probed on the summary sheet, first match wins.
/// Case-sensitive on purpose: the summary export spells them exactly.
pub const IDENTIFIER_COLUMNS: [&str; 2] = ["UserID", "User ID"];

/// ALLOCATION / MAX_LOSS go in before the 10th column.
pub const INJECT_AT: usize = 9;

/// Canonical layout of the enriched sheet.
pub const DESIRED_ORDER: [&str; 19] = [
    "SNO",
    "Enabled",
    "UserID",
    "Alias",
    "LoggedIn",
    "SqOff Done",
    "Broker",
    "Qty Multiplier",
    MTM_ALL,
    ALLOCATION,
    MAX_LOSS,
    "Available Margin",
    "Total Orders",
    "Total Lots",
    SERVER,
    ALGO,
    REMARK,
    OPERATOR,
    EXPIRY,
];
