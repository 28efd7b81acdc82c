//! `sumrec-recon`: roster/summary reconciliation engine.
//!
//! Pure engine crate: receives tables that are already loaded, returns the
//! cleaned roster, the identifier lookup and the enriched summary sheet.
//! No CLI or IO dependencies.

pub mod columns;
pub mod constants;
pub mod enrich;
pub mod error;
pub mod overlay;
pub mod roster;

pub use constants::{Constants, Expiry, FormChoices, FormInput};
pub use enrich::{enrich, EnrichRequest, EnrichSummary, Enriched, RemarkOverrides};
pub use error::ReconError;
pub use overlay::MtmOverlay;
pub use roster::{build_lookup, clean_roster, Lookup, LookupEntry, RosterRow};
