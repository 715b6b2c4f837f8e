//! Short-form report-descriptor items.
//!
//! Layout of the item header byte:
//!
//! ```text
//! bits: [ 7 6 5 4 | 3 2 | 1 0 ]
//!         tag(4)   type(2) size-code(2)
//! size-code: 0 -> 0 bytes, 1 -> 1 byte, 2 -> 2 bytes, 3 -> 4 bytes
//! ```
//!
//! The header is followed by the little-endian payload. Decoding is lenient:
//! bytes past the end of the buffer read as zero, since some devices ship
//! truncated descriptors.

use std::iter::FusedIterator;

/// Item type from header bits 2..3.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ItemType {
    Main = 0,
    Global = 1,
    Local = 2,
    Reserved = 3,
}

impl ItemType {
    #[inline]
    pub const fn from_bits(bits: u8) -> Self {
        match bits & 0x3 {
            0 => ItemType::Main,
            1 => ItemType::Global,
            2 => ItemType::Local,
            _ => ItemType::Reserved,
        }
    }
}

/// Tag value marking the header of a long item.
pub const LONG_ITEM_TAG: u8 = 15;

/// One decoded report-descriptor item.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Item {
    item_type: ItemType,
    tag: u8,
    data: Vec<u8>,
}

impl Item {
    /// Builds an item from its parts. `tag` is masked to 4 bits.
    pub fn new(item_type: ItemType, tag: u8, data: impl Into<Vec<u8>>) -> Self {
        Self {
            item_type,
            tag: tag & 0x0F,
            data: data.into(),
        }
    }

    /// Builds an item holding `value` in the narrowest unsigned payload (1, 2 or 4 bytes).
    pub fn with_unsigned(item_type: ItemType, tag: u8, value: u32) -> Self {
        let bytes = value.to_le_bytes();
        let len = if value <= 0xFF {
            1
        } else if value <= 0xFFFF {
            2
        } else {
            4
        };
        Self::new(item_type, tag, &bytes[..len])
    }

    /// Builds an item holding `value` in the narrowest signed payload.
    pub fn with_signed(item_type: ItemType, tag: u8, value: i32) -> Self {
        let bytes = value.to_le_bytes();
        let len = if i8::try_from(value).is_ok() {
            1
        } else if i16::try_from(value).is_ok() {
            2
        } else {
            4
        };
        Self::new(item_type, tag, &bytes[..len])
    }

    /// Decodes one item starting at `offset`.
    ///
    /// Returns the item and the number of buffer bytes it consumed. Payload
    /// bytes missing from the end of the buffer decode as zero and are not
    /// counted as consumed.
    pub fn decode(buf: &[u8], offset: usize) -> (Item, usize) {
        let rest = buf.get(offset..).unwrap_or(&[]);
        let mut bytes = rest.iter().copied();
        let mut consumed = 0usize;
        let mut next = || match bytes.next() {
            Some(b) => {
                consumed += 1;
                b
            }
            None => 0,
        };

        let header = next();
        let size = match header & 0x3 {
            3 => 4,
            n => n as usize,
        };
        let item_type = ItemType::from_bits(header >> 2);
        let tag = header >> 4;
        let data: Vec<u8> = (0..size).map(|_| next()).collect();

        (
            Item {
                item_type,
                tag,
                data,
            },
            consumed,
        )
    }

    #[inline]
    pub fn item_type(&self) -> ItemType {
        self.item_type
    }

    #[inline]
    pub fn tag(&self) -> u8 {
        self.tag
    }

    #[inline]
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Header of a long item (tag 15, reserved type, at least two payload bytes).
    ///
    /// The short-form codec does not interpret long items; `data()[0]` holds
    /// the length of the long payload that follows.
    pub fn is_long(&self) -> bool {
        self.tag == LONG_ITEM_TAG && self.item_type == ItemType::Reserved && self.data.len() >= 2
    }

    pub fn is_short(&self) -> bool {
        !self.is_long() && matches!(self.data.len(), 0 | 1 | 2 | 4)
    }

    /// Payload as an unsigned little-endian value. Zero for long items.
    pub fn value_unsigned(&self) -> u32 {
        if !self.is_short() {
            return 0;
        }
        self.data
            .iter()
            .enumerate()
            .fold(0u32, |acc, (i, b)| acc | (u32::from(*b) << (8 * i)))
    }

    /// Payload sign-extended from its own width (1 -> i8, 2 -> i16, 4 -> i32).
    pub fn value_signed(&self) -> i32 {
        if !self.is_short() {
            return 0;
        }
        let raw = self.value_unsigned();
        match self.data.len() {
            1 => i32::from(raw as u8 as i8),
            2 => i32::from(raw as u16 as i16),
            4 => raw as i32,
            _ => 0,
        }
    }

    /// True when the top payload bit is set, i.e. the value is negative if
    /// read as signed.
    pub fn may_be_negative(&self) -> bool {
        self.is_short() && self.data.last().is_some_and(|b| b & 0x80 != 0)
    }

    /// Appends the encoded item to `out`. Items that are not short-form
    /// encode to nothing.
    pub fn encode_into(&self, out: &mut Vec<u8>) {
        if !self.is_short() {
            return;
        }
        let size_code = match self.data.len() {
            4 => 3,
            n => n as u8,
        };
        out.push(size_code | (self.item_type as u8) << 2 | self.tag << 4);
        out.extend_from_slice(&self.data);
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(1 + self.data.len());
        self.encode_into(&mut out);
        out
    }
}

/// Lazily decodes every item in `buf`.
///
/// The returned iterator is `Clone`, so a sequence can be restarted or
/// walked twice without re-reading the device. Long items are yielded as
/// their header only; their payload is skipped.
pub fn decode_all(buf: &[u8]) -> Items<'_> {
    Items { buf, pos: 0 }
}

/// Encodes a sequence of short items back to bytes.
pub fn encode_all<'a>(items: impl IntoIterator<Item = &'a Item>) -> Vec<u8> {
    let mut out = Vec::new();
    for item in items {
        item.encode_into(&mut out);
    }
    out
}

/// Iterator returned by [`decode_all`].
#[derive(Clone, Debug)]
pub struct Items<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl Iterator for Items<'_> {
    type Item = Item;

    fn next(&mut self) -> Option<Item> {
        if self.pos >= self.buf.len() {
            return None;
        }
        let (item, consumed) = Item::decode(self.buf, self.pos);
        self.pos += consumed;
        if item.is_long() {
            // Skip the long payload; its length sits in the first data byte.
            self.pos = self.pos.saturating_add(usize::from(item.data[0]));
        }
        Some(item)
    }
}

impl FusedIterator for Items<'_> {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_usage_page() {
        let (item, n) = Item::decode(&[0x05, 0x01], 0);
        assert_eq!(n, 2);
        assert_eq!(item.item_type(), ItemType::Global);
        assert_eq!(item.tag(), 0);
        assert_eq!(item.data(), &[0x01]);
        assert_eq!(item.value_unsigned(), 1);
    }

    #[test]
    fn size_code_three_means_four_bytes() {
        let buf = [0x27, 0xFF, 0xFF, 0x00, 0x00];
        let (item, n) = Item::decode(&buf, 0);
        assert_eq!(n, 5);
        assert_eq!(item.tag(), 2);
        assert_eq!(item.data().len(), 4);
        assert_eq!(item.value_unsigned(), 0xFFFF);
        assert_eq!(item.value_signed(), 0xFFFF);
    }

    #[test]
    fn signed_views() {
        let (one, _) = Item::decode(&[0x15, 0xFF], 0);
        assert_eq!(one.value_signed(), -1);
        assert_eq!(one.value_unsigned(), 0xFF);
        assert!(one.may_be_negative());

        let (two, _) = Item::decode(&[0x16, 0xFF, 0x7F], 0);
        assert_eq!(two.value_signed(), 32767);
        assert!(!two.may_be_negative());

        let (four, _) = Item::decode(&[0x17, 0x00, 0x00, 0x00, 0x80], 0);
        assert_eq!(four.value_signed(), i32::MIN);
    }

    #[test]
    fn zero_length_payload_is_zero() {
        let (item, n) = Item::decode(&[0xC0], 0);
        assert_eq!(n, 1);
        assert_eq!(item.item_type(), ItemType::Main);
        assert_eq!(item.tag(), 12);
        assert_eq!(item.value_unsigned(), 0);
        assert_eq!(item.value_signed(), 0);
    }

    #[test]
    fn truncated_payload_reads_zero() {
        let (item, n) = Item::decode(&[0x27, 0x01], 0);
        assert_eq!(n, 2);
        assert_eq!(item.data(), &[0x01, 0x00, 0x00, 0x00]);
        assert_eq!(item.value_unsigned(), 1);
    }

    #[test]
    fn decode_at_offset() {
        let buf = [0x05, 0x01, 0x09, 0x04];
        let (item, n) = Item::decode(&buf, 2);
        assert_eq!(n, 2);
        assert_eq!(item.item_type(), ItemType::Local);
        assert_eq!(item.value_unsigned(), 4);

        let (_, n) = Item::decode(&buf, 10);
        assert_eq!(n, 0);
    }

    #[test]
    fn decode_all_is_restartable() {
        let buf = [0x05, 0x01, 0x09, 0x05, 0xA1, 0x01, 0xC0];
        let items = decode_all(&buf);
        let first: Vec<_> = items.clone().collect();
        let second: Vec<_> = items.collect();
        assert_eq!(first.len(), 4);
        assert_eq!(first, second);
        assert_eq!(encode_all(&first), buf);
    }

    #[test]
    fn long_items_are_skipped() {
        // Long item header, 3 payload bytes, then End Collection.
        let buf = [0xFE, 0x03, 0x10, 0xAA, 0xBB, 0xCC, 0xC0];
        let items: Vec<_> = decode_all(&buf).collect();
        assert_eq!(items.len(), 2);
        assert!(items[0].is_long());
        assert!(!items[0].is_short());
        assert_eq!(items[0].value_unsigned(), 0);
        assert!(items[0].encode().is_empty());
        assert_eq!(items[1].tag(), 12);
    }

    #[test]
    fn narrowest_payloads() {
        assert_eq!(Item::with_unsigned(ItemType::Global, 7, 8).encode(), [0x75, 0x08]);
        assert_eq!(
            Item::with_unsigned(ItemType::Global, 2, 0x1234).encode(),
            [0x26, 0x34, 0x12]
        );
        assert_eq!(Item::with_signed(ItemType::Global, 1, -1).encode(), [0x15, 0xFF]);
        assert_eq!(
            Item::with_signed(ItemType::Global, 1, -200).encode(),
            [0x16, 0x38, 0xFF]
        );
        assert_eq!(Item::with_signed(ItemType::Global, 1, -200).value_signed(), -200);
    }
}
