use hidlink::report_descriptor::{decode_all, encode_all, Item, ItemType, ReportLayout};
use proptest::prelude::*;

fn item_type() -> impl Strategy<Value = ItemType> {
    prop_oneof![
        Just(ItemType::Main),
        Just(ItemType::Global),
        Just(ItemType::Local),
        Just(ItemType::Reserved),
    ]
}

fn short_item() -> impl Strategy<Value = Item> {
    (
        item_type(),
        0u8..16,
        prop_oneof![
            Just(0usize),
            Just(1usize),
            Just(2usize),
            Just(4usize)
        ],
    )
        .prop_flat_map(|(t, tag, len)| {
            proptest::collection::vec(any::<u8>(), len).prop_map(move |data| Item::new(t, tag, data))
        })
        .prop_filter("long item headers do not encode", |item| item.is_short())
}

proptest! {
    #[test]
    fn decoding_arbitrary_bytes_never_overruns(buf in proptest::collection::vec(any::<u8>(), 0..256)) {
        let mut pos = 0;
        while pos < buf.len() {
            let (_, consumed) = Item::decode(&buf, pos);
            prop_assert!(consumed >= 1);
            prop_assert!(pos + consumed <= buf.len());
            pos += consumed;
        }
        prop_assert!(decode_all(&buf).count() <= buf.len());
    }

    #[test]
    fn well_formed_sequences_survive_reencoding(items in proptest::collection::vec(short_item(), 0..32)) {
        let bytes = encode_all(&items);
        let decoded: Vec<Item> = decode_all(&bytes).collect();
        prop_assert_eq!(&decoded, &items);
        prop_assert_eq!(encode_all(&decoded), bytes);
    }

    #[test]
    fn signed_values_sign_extend(value in any::<i32>()) {
        let item = Item::with_signed(ItemType::Global, 1, value);
        prop_assert_eq!(item.value_signed(), value);
        prop_assert_eq!(item.may_be_negative(), value < 0);
    }

    #[test]
    fn unsigned_values_use_narrowest_payload(value in any::<u32>()) {
        let item = Item::with_unsigned(ItemType::Global, 7, value);
        prop_assert_eq!(item.value_unsigned(), value);
        let expected = if value <= 0xFF { 1 } else if value <= 0xFFFF { 2 } else { 4 };
        prop_assert_eq!(item.data().len(), expected);
    }

    #[test]
    fn layout_parsing_tolerates_garbage(buf in proptest::collection::vec(any::<u8>(), 0..512)) {
        let layout = ReportLayout::parse(&buf);
        let _ = layout.max_input_len();
        let _ = layout.max_output_len();
        let _ = layout.max_feature_len();
    }
}
