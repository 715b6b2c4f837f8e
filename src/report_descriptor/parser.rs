//! Report layout from a raw report descriptor.
//!
//! The parser runs the items through the HID global/local state machine and
//! records, for every `(kind, report id)`, the ordered list of data fields
//! ([`ReportSegment`]s) that make up the report: bit position, element size
//! and count, main-item flags, logical and physical ranges, and usages.
//! Report lengths fall out of the segment sizes.
//!
//! Collections, units, designators and strings are not modelled.

use std::collections::BTreeMap;
use std::fmt;

use super::item::{decode_all, Item, ItemType};

mod global_tag {
    pub const USAGE_PAGE: u8 = 0;
    pub const LOGICAL_MINIMUM: u8 = 1;
    pub const LOGICAL_MAXIMUM: u8 = 2;
    pub const PHYSICAL_MINIMUM: u8 = 3;
    pub const PHYSICAL_MAXIMUM: u8 = 4;
    pub const REPORT_SIZE: u8 = 7;
    pub const REPORT_ID: u8 = 8;
    pub const REPORT_COUNT: u8 = 9;
    pub const PUSH: u8 = 10;
    pub const POP: u8 = 11;
}

mod local_tag {
    pub const USAGE: u8 = 0;
    pub const USAGE_MINIMUM: u8 = 1;
    pub const USAGE_MAXIMUM: u8 = 2;
    pub const DELIMITER: u8 = 10;
}

mod main_tag {
    pub const INPUT: u8 = 8;
    pub const OUTPUT: u8 = 9;
    pub const FEATURE: u8 = 11;
}

/// Direction of a report as declared by its main item.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ReportKind {
    Input,
    Output,
    Feature,
}

/// Data bits of an Input, Output or Feature main item.
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct DataFlags(u32);

impl DataFlags {
    pub const CONSTANT: u32 = 1 << 0;
    pub const VARIABLE: u32 = 1 << 1;
    pub const RELATIVE: u32 = 1 << 2;
    pub const WRAP: u32 = 1 << 3;
    pub const NONLINEAR: u32 = 1 << 4;
    pub const NO_PREFERRED: u32 = 1 << 5;
    pub const NULL_STATE: u32 = 1 << 6;
    pub const VOLATILE: u32 = 1 << 7;
    pub const BUFFERED_BYTES: u32 = 1 << 8;

    pub const fn from_bits(bits: u32) -> Self {
        Self(bits)
    }

    pub const fn bits(self) -> u32 {
        self.0
    }

    pub const fn contains(self, flag: u32) -> bool {
        self.0 & flag == flag
    }

    /// Padding or fixed data.
    pub const fn is_constant(self) -> bool {
        self.contains(Self::CONSTANT)
    }

    /// One value per element; otherwise each element is an array index.
    pub const fn is_variable(self) -> bool {
        self.contains(Self::VARIABLE)
    }

    pub const fn is_relative(self) -> bool {
        self.contains(Self::RELATIVE)
    }
}

impl fmt::Debug for DataFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        const NAMES: [&str; 9] = [
            "Constant",
            "Variable",
            "Relative",
            "Wrap",
            "Nonlinear",
            "NoPreferred",
            "NullState",
            "Volatile",
            "BufferedBytes",
        ];
        let set: Vec<&str> = NAMES
            .iter()
            .enumerate()
            .filter(|(bit, _)| self.0 & (1 << bit) != 0)
            .map(|(_, name)| *name)
            .collect();
        if set.is_empty() {
            f.write_str("DataFlags(Data|Array|Absolute)")
        } else {
            write!(f, "DataFlags({})", set.join("|"))
        }
    }
}

/// Usages attached to a data field, as extended usages (`page << 16 | id`).
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum Usages {
    #[default]
    None,
    /// `Usage Minimum` .. `Usage Maximum`, one usage per element.
    Range { min: u32, max: u32 },
    /// Explicit `Usage` items. Each entry is one element's usage set; a set
    /// holds more than one usage only when declared inside delimiters.
    List(Vec<Vec<u32>>),
}

impl Usages {
    /// Number of distinct element slots.
    pub fn len(&self) -> usize {
        match self {
            Usages::None => 0,
            Usages::Range { min, max } if max >= min => ((max - min) as usize).saturating_add(1),
            Usages::Range { .. } => 0,
            Usages::List(sets) => sets.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Usages for element `index`. Elements past the end reuse the last
    /// declared usage.
    pub fn for_element(&self, index: usize) -> Vec<u32> {
        let count = self.len();
        if count == 0 {
            return Vec::new();
        }
        let index = index.min(count - 1);
        match self {
            Usages::None => Vec::new(),
            Usages::Range { min, .. } => vec![min + index as u32],
            Usages::List(sets) => sets[index].clone(),
        }
    }

    pub fn contains(&self, usage: u32) -> bool {
        match self {
            Usages::None => false,
            Usages::Range { min, max } => (*min..=*max).contains(&usage),
            Usages::List(sets) => sets.iter().flatten().any(|u| *u == usage),
        }
    }
}

/// One Input, Output or Feature main item inside a report.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReportSegment {
    /// Bit position within the report payload (after the Report-ID byte).
    pub bit_offset: u64,
    /// Report Size, in bits.
    pub element_size: u32,
    /// Report Count.
    pub element_count: u32,
    pub flags: DataFlags,
    /// Set when either logical bound has its top bit set.
    pub logical_is_signed: bool,
    pub logical_min: i32,
    pub logical_max: i32,
    /// Defaults to the logical range when unset or both zero.
    pub physical_min: i32,
    pub physical_max: i32,
    pub usages: Usages,
}

impl ReportSegment {
    pub fn bit_len(&self) -> u64 {
        u64::from(self.element_size) * u64::from(self.element_count)
    }

    /// Raw bits of element `element` from a report payload (no ID byte),
    /// little-endian, at most 32 bits. Bits past the end of `payload` read
    /// as zero.
    pub fn read_raw(&self, payload: &[u8], element: u32) -> u32 {
        let start = self.bit_offset + u64::from(element) * u64::from(self.element_size);
        let width = self.element_size.min(32);
        (0..width).fold(0u32, |value, i| {
            let bit = start + u64::from(i);
            let byte = usize::try_from(bit / 8)
                .ok()
                .and_then(|at| payload.get(at))
                .copied()
                .unwrap_or(0);
            if byte & (1 << (bit % 8)) != 0 {
                value | (1 << i)
            } else {
                value
            }
        })
    }

    /// Element value, sign-extended from `element_size` when the logical
    /// range is signed.
    pub fn read(&self, payload: &[u8], element: u32) -> i32 {
        let raw = self.read_raw(payload, element);
        let width = self.element_size.min(32);
        if !self.logical_is_signed || width == 0 || width == 32 {
            return raw as i32;
        }
        let shift = 32 - width;
        ((raw << shift) as i32) >> shift
    }
}

/// All the data fields of one report, in declaration order.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Report {
    pub kind: ReportKind,
    pub id: u8,
    pub segments: Vec<ReportSegment>,
}

impl Report {
    pub fn bit_len(&self) -> u64 {
        self.segments
            .iter()
            .fold(0u64, |bits, s| bits.saturating_add(s.bit_len()))
    }

    /// Payload length in bytes, without the Report-ID byte.
    pub fn len(&self) -> usize {
        bits_to_bytes(self.bit_len())
    }

    pub fn is_empty(&self) -> bool {
        self.bit_len() == 0
    }
}

#[derive(Clone, Debug, Default)]
struct GlobalState {
    usage_page: u32,
    logical_min: Option<Item>,
    logical_max: Option<Item>,
    physical_min: Option<Item>,
    physical_max: Option<Item>,
    report_size: u32,
    report_count: u32,
    report_id: u8,
}

fn item_value(item: Option<&Item>, signed: bool) -> i32 {
    match item {
        None => 0,
        Some(item) if signed => item.value_signed(),
        Some(item) => item.value_unsigned() as i32,
    }
}

impl GlobalState {
    fn segment(&self, flags: u32, bit_offset: u64, usages: Usages) -> ReportSegment {
        let logical_is_signed = self.logical_min.as_ref().is_some_and(Item::may_be_negative)
            || self.logical_max.as_ref().is_some_and(Item::may_be_negative);
        let logical_min = item_value(self.logical_min.as_ref(), logical_is_signed);
        let logical_max = item_value(self.logical_max.as_ref(), logical_is_signed);

        let physical_signed = self.physical_min.as_ref().is_some_and(Item::may_be_negative)
            || self.physical_max.as_ref().is_some_and(Item::may_be_negative);
        let mut physical_min = item_value(self.physical_min.as_ref(), physical_signed);
        let mut physical_max = item_value(self.physical_max.as_ref(), physical_signed);
        if self.physical_min.is_none()
            || self.physical_max.is_none()
            || (physical_min == 0 && physical_max == 0)
        {
            physical_min = logical_min;
            physical_max = logical_max;
        }

        ReportSegment {
            bit_offset,
            element_size: self.report_size,
            element_count: self.report_count,
            flags: DataFlags::from_bits(flags),
            logical_is_signed,
            logical_min,
            logical_max,
            physical_min,
            physical_max,
            usages,
        }
    }
}

/// Local items seen since the last main item.
#[derive(Default)]
struct LocalState {
    usages: Vec<Vec<u32>>,
    usage_min: Option<u32>,
    usage_max: Option<u32>,
    delimiter_depth: u32,
    // Alternate usages of the open delimiter set.
    open_set: Vec<u32>,
}

impl LocalState {
    fn usage(&mut self, usage: u32) {
        if self.delimiter_depth > 0 {
            self.open_set.push(usage);
        } else {
            self.usages.push(vec![usage]);
        }
    }

    fn delimiter(&mut self, open: bool) {
        if open {
            if self.delimiter_depth == 0 {
                self.open_set.clear();
            }
            self.delimiter_depth += 1;
        } else if self.delimiter_depth > 0 {
            self.delimiter_depth -= 1;
            if self.delimiter_depth == 0 && !self.open_set.is_empty() {
                self.usages.push(std::mem::take(&mut self.open_set));
            }
        }
    }

    fn take_usages(&mut self) -> Usages {
        let state = std::mem::take(self);
        match (state.usage_min, state.usage_max) {
            (Some(min), Some(max)) => Usages::Range { min, max },
            _ if !state.usages.is_empty() => Usages::List(state.usages),
            _ => Usages::None,
        }
    }
}

/// Reports declared by a descriptor, and the derived maximum lengths.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ReportLayout {
    reports: BTreeMap<(ReportKind, u8), Report>,
    reports_use_id: bool,
}

impl ReportLayout {
    pub fn parse(descriptor: &[u8]) -> Self {
        Self::from_items(decode_all(descriptor))
    }

    pub fn from_items(items: impl IntoIterator<Item = Item>) -> Self {
        let mut layout = ReportLayout::default();
        let mut state = GlobalState::default();
        let mut stack: Vec<GlobalState> = Vec::new();
        let mut local = LocalState::default();

        for item in items {
            match item.item_type() {
                ItemType::Global => match item.tag() {
                    global_tag::USAGE_PAGE => state.usage_page = item.value_unsigned(),
                    global_tag::LOGICAL_MINIMUM => state.logical_min = Some(item),
                    global_tag::LOGICAL_MAXIMUM => state.logical_max = Some(item),
                    global_tag::PHYSICAL_MINIMUM => state.physical_min = Some(item),
                    global_tag::PHYSICAL_MAXIMUM => state.physical_max = Some(item),
                    global_tag::REPORT_SIZE => state.report_size = item.value_unsigned(),
                    global_tag::REPORT_COUNT => state.report_count = item.value_unsigned(),
                    global_tag::REPORT_ID => {
                        state.report_id = item.value_unsigned() as u8;
                        layout.reports_use_id = true;
                    }
                    global_tag::PUSH => stack.push(state.clone()),
                    global_tag::POP => {
                        if let Some(prev) = stack.pop() {
                            state = prev;
                        }
                    }
                    _ => {}
                },
                ItemType::Local => {
                    let extended = || {
                        let value = item.value_unsigned();
                        // 16-bit usages are qualified by the current page.
                        if value <= 0xFFFF {
                            value | (state.usage_page << 16)
                        } else {
                            value
                        }
                    };
                    match item.tag() {
                        local_tag::USAGE => local.usage(extended()),
                        local_tag::USAGE_MINIMUM => local.usage_min = Some(extended()),
                        local_tag::USAGE_MAXIMUM => local.usage_max = Some(extended()),
                        local_tag::DELIMITER => local.delimiter(item.value_unsigned() == 1),
                        _ => {}
                    }
                }
                ItemType::Main => {
                    let usages = local.take_usages();
                    let kind = match item.tag() {
                        main_tag::INPUT => ReportKind::Input,
                        main_tag::OUTPUT => ReportKind::Output,
                        main_tag::FEATURE => ReportKind::Feature,
                        _ => continue,
                    };
                    let report = layout
                        .reports
                        .entry((kind, state.report_id))
                        .or_insert_with(|| Report {
                            kind,
                            id: state.report_id,
                            segments: Vec::new(),
                        });
                    let offset = report.bit_len();
                    report
                        .segments
                        .push(state.segment(item.value_unsigned(), offset, usages));
                }
                ItemType::Reserved => {}
            }
        }

        layout
    }

    /// True if the descriptor declares any Report ID.
    pub fn reports_use_id(&self) -> bool {
        self.reports_use_id
    }

    pub fn report(&self, kind: ReportKind, id: u8) -> Option<&Report> {
        self.reports.get(&(kind, id))
    }

    /// Every declared report of `kind`, by ascending ID.
    pub fn reports_of(&self, kind: ReportKind) -> impl Iterator<Item = &Report> + '_ {
        self.reports.values().filter(move |r| r.kind == kind)
    }

    /// Payload length in bytes of one report, without the Report-ID byte.
    pub fn report_len(&self, kind: ReportKind, id: u8) -> Option<usize> {
        self.report(kind, id).map(Report::len)
    }

    /// `(kind, report id, payload length)` for every declared report.
    pub fn reports(&self) -> impl Iterator<Item = (ReportKind, u8, usize)> + '_ {
        self.reports.values().map(|r| (r.kind, r.id, r.len()))
    }

    /// Usage set of every element slot of every input segment, in report
    /// order.
    pub fn input_usages(&self) -> impl Iterator<Item = Vec<u32>> + '_ {
        self.reports_of(ReportKind::Input)
            .flat_map(|r| r.segments.iter())
            .flat_map(|s| (0..s.usages.len()).map(move |i| s.usages.for_element(i)))
    }

    pub fn max_len(&self, kind: ReportKind) -> usize {
        self.reports_of(kind).map(Report::len).max().unwrap_or(0)
    }

    pub fn max_input_len(&self) -> usize {
        self.max_len(ReportKind::Input)
    }

    pub fn max_output_len(&self) -> usize {
        self.max_len(ReportKind::Output)
    }

    pub fn max_feature_len(&self) -> usize {
        self.max_len(ReportKind::Feature)
    }
}

fn bits_to_bytes(bits: u64) -> usize {
    usize::try_from(bits.div_ceil(8)).unwrap_or(usize::MAX)
}

/// Adds the Report-ID byte to a non-zero payload length.
///
/// Report lengths are exposed with the leading ID byte included, even for
/// devices that do not use IDs (the byte is then always 0).
#[inline]
pub fn with_report_id_byte(len: usize) -> usize {
    if len > 0 {
        len.saturating_add(1)
    } else {
        0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Boot-protocol mouse: 3 buttons + 5 bits padding, X/Y/wheel as 8-bit.
    const MOUSE: &[u8] = &[
        0x05, 0x01, 0x09, 0x02, 0xA1, 0x01, 0x09, 0x01, 0xA1, 0x00, 0x05, 0x09, 0x19, 0x01, 0x29,
        0x03, 0x15, 0x00, 0x25, 0x01, 0x95, 0x03, 0x75, 0x01, 0x81, 0x02, 0x95, 0x01, 0x75, 0x05,
        0x81, 0x03, 0x05, 0x01, 0x09, 0x30, 0x09, 0x31, 0x09, 0x38, 0x15, 0x81, 0x25, 0x7F, 0x75,
        0x08, 0x95, 0x03, 0x81, 0x06, 0xC0, 0xC0,
    ];

    #[test]
    fn mouse_without_report_ids() {
        let layout = ReportLayout::parse(MOUSE);
        assert!(!layout.reports_use_id());
        assert_eq!(layout.max_input_len(), 4);
        assert_eq!(layout.max_output_len(), 0);
        assert_eq!(layout.max_feature_len(), 0);
        assert_eq!(with_report_id_byte(layout.max_input_len()), 5);
        assert_eq!(with_report_id_byte(layout.max_output_len()), 0);

        let report = layout.report(ReportKind::Input, 0).unwrap();
        assert_eq!(report.len(), 4);
        let [buttons, padding, axes] = report.segments.as_slice() else {
            panic!("expected three segments, got {:?}", report.segments);
        };

        assert_eq!(buttons.bit_offset, 0);
        assert_eq!((buttons.element_size, buttons.element_count), (1, 3));
        assert!(buttons.flags.is_variable() && !buttons.flags.is_constant());
        assert!(!buttons.logical_is_signed);
        assert_eq!((buttons.logical_min, buttons.logical_max), (0, 1));
        assert_eq!((buttons.physical_min, buttons.physical_max), (0, 1));
        assert_eq!(
            buttons.usages,
            Usages::Range {
                min: 0x0009_0001,
                max: 0x0009_0003
            }
        );

        assert_eq!(padding.bit_offset, 3);
        assert!(padding.flags.is_constant());
        assert!(padding.usages.is_empty());

        assert_eq!(axes.bit_offset, 8);
        assert_eq!((axes.element_size, axes.element_count), (8, 3));
        assert!(axes.flags.is_relative() && axes.flags.is_variable());
        assert!(axes.logical_is_signed);
        assert_eq!((axes.logical_min, axes.logical_max), (-127, 127));
        assert_eq!(
            axes.usages,
            Usages::List(vec![vec![0x0001_0030], vec![0x0001_0031], vec![0x0001_0038]])
        );

        let usages: Vec<Vec<u32>> = layout.input_usages().collect();
        assert_eq!(usages.len(), 6);
        assert_eq!(usages[2], [0x0009_0003]);
        assert_eq!(usages[5], [0x0001_0038]);
    }

    #[test]
    fn segments_read_their_elements() {
        let layout = ReportLayout::parse(MOUSE);
        let report = layout.report(ReportKind::Input, 0).unwrap();
        let (buttons, axes) = (&report.segments[0], &report.segments[2]);

        // Left and right pressed, X = -2, Y = 5, wheel = -1.
        let payload = [0b0000_0101, 0xFE, 0x05, 0xFF];
        let pressed: Vec<i32> = (0..3).map(|i| buttons.read(&payload, i)).collect();
        assert_eq!(pressed, [1, 0, 1]);
        assert_eq!(axes.read(&payload, 0), -2);
        assert_eq!(axes.read(&payload, 1), 5);
        assert_eq!(axes.read(&payload, 2), -1);
        assert_eq!(axes.read_raw(&payload, 2), 0xFF);
        // Short payloads read as zero past the end.
        assert_eq!(axes.read(&payload[..2], 2), 0);
    }

    #[test]
    fn locals_reset_after_each_main_item() {
        let desc = [
            0x06, 0x00, 0xFF, // Usage Page (vendor)
            0x75, 0x08, 0x95, 0x01, // 8 bits x 1
            0x09, 0x01, 0x81, 0x02, // Usage 1, Input
            0x81, 0x02, // Input with no usage
            0x0B, 0x02, 0x00, 0x0C, 0x00, // extended Usage 0x000C_0002
            0xA9, 0x01, 0x09, 0x03, 0x09, 0x04, 0xA9, 0x00, // delimited alternates
            0x95, 0x02, 0xB1, 0x02, // Feature, 2 elements
            0x35, 0x00, 0x45, 0x00, // Physical 0..0 falls back to logical
            0x16, 0x00, 0x80, 0x26, 0xFF, 0x7F, // Logical -32768..32767
            0x91, 0x02, // Output
        ];
        let layout = ReportLayout::parse(&desc);

        let input = layout.report(ReportKind::Input, 0).unwrap();
        assert_eq!(input.segments[0].usages, Usages::List(vec![vec![0xFF00_0001]]));
        assert_eq!(input.segments[1].usages, Usages::None);
        assert_eq!(input.segments[1].bit_offset, 8);

        let feature = layout.report(ReportKind::Feature, 0).unwrap();
        let usages = &feature.segments[0].usages;
        assert_eq!(usages.for_element(0), [0x000C_0002]);
        assert_eq!(usages.for_element(1), [0xFF00_0003, 0xFF00_0004]);
        assert_eq!(usages.for_element(7), [0xFF00_0003, 0xFF00_0004]);
        assert!(usages.contains(0xFF00_0004));

        let output = &layout.report(ReportKind::Output, 0).unwrap().segments[0];
        assert!(output.logical_is_signed);
        assert_eq!((output.logical_min, output.logical_max), (-32768, 32767));
        assert_eq!((output.physical_min, output.physical_max), (-32768, 32767));
        assert!(output.usages.is_empty());
    }

    #[test]
    fn reports_with_ids_are_sized_separately() {
        let desc = [
            0x06, 0x00, 0xFF, // Usage Page (vendor)
            0x09, 0x01, // Usage
            0xA1, 0x01, // Collection (Application)
            0x85, 0x01, // Report ID 1
            0x75, 0x08, // Report Size 8
            0x95, 0x3F, // Report Count 63
            0x09, 0x01, 0x81, 0x02, // Input
            0x09, 0x01, 0x91, 0x02, // Output
            0x85, 0x02, // Report ID 2
            0x95, 0x07, // Report Count 7
            0x09, 0x01, 0xB1, 0x02, // Feature
            0xC0,
        ];
        let layout = ReportLayout::parse(&desc);
        assert!(layout.reports_use_id());
        assert_eq!(layout.report_len(ReportKind::Input, 1), Some(63));
        assert_eq!(layout.report_len(ReportKind::Output, 1), Some(63));
        assert_eq!(layout.report_len(ReportKind::Feature, 2), Some(7));
        assert_eq!(layout.report_len(ReportKind::Feature, 1), None);
        assert_eq!(layout.max_feature_len(), 7);
    }

    #[test]
    fn push_pop_restores_globals() {
        let desc = [
            0x75, 0x08, 0x95, 0x02, // 8 bits x 2
            0xA4, // Push
            0x75, 0x01, 0x95, 0x03, // 1 bit x 3
            0x81, 0x02, // Input: 3 bits
            0xB4, // Pop
            0x81, 0x02, // Input: 16 bits
            0xB4, // unbalanced Pop is ignored
            0x81, 0x02, // Input: 16 bits
        ];
        let layout = ReportLayout::parse(&desc);
        // 3 + 16 + 16 = 35 bits -> 5 bytes
        assert_eq!(layout.max_input_len(), 5);
    }

    #[test]
    fn empty_descriptor() {
        let layout = ReportLayout::parse(&[]);
        assert!(!layout.reports_use_id());
        assert_eq!(layout.reports().count(), 0);
        assert_eq!(layout.max_input_len(), 0);
    }
}
