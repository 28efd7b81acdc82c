// Configuration loading

pub mod settings;

pub use settings::{FormSettings, LedgerSettings, PreviewSettings, RosterSettings, Settings, StoreSettings};
