//! Faction data: block keys, typed views and the consumer repository.
//!
//! ## Storage Layout
//! ```text
//! IndexedDB "army-datasource"
//! └── blocks
//!     ├── SM_translated    merged faction document
//!     ├── SM_flat_en       flat translation map (English)
//!     ├── SM_flat_fr       flat translation map (French)
//!     └── ...
//! ```

pub mod datasource;
pub mod keys;
pub mod model;

pub use datasource::{Datasource, DatasourceError, DatasourceResult};
pub use keys::{BlockKey, FactionCode, Lang};
pub use model::{normalize_name, Datasheet, Faction, FactionHeader, TranslationMap};
