//! HID report-descriptor decoding.
//!
//! [`item`] is the short-form item codec. [`parser`] walks the items into
//! per-report field layouts, which also size reports on platforms whose
//! drivers do not report sizes (hidraw, hidapi).

pub mod item;
pub mod parser;

pub use item::{decode_all, encode_all, Item, ItemType, Items};
pub use parser::{
    with_report_id_byte, DataFlags, Report, ReportKind, ReportLayout, ReportSegment, Usages,
};
