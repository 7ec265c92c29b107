use chrono::{DateTime, Duration, TimeZone, Utc};
use murmur_client::materialize::MaterializedLog;
use murmur_client::remote::{Document, DocumentChange};
use murmur_shared::crypto;
use murmur_shared::protocol::{encode_timestamp, MessageBody, MessageRecord};
use murmur_shared::types::{ChatId, MessageId, UserId};
use proptest::prelude::*;

fn chat() -> ChatId {
    ChatId("alice_bob".into())
}

fn base() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 11, 12, 10, 0, 0).unwrap()
}

fn message(seq: usize, at: DateTime<Utc>) -> Document {
    let key = crypto::derive_chat_key(&chat());
    let id = MessageId::new();
    let sealed = MessageBody::Text(seq.to_string()).seal(&key).unwrap();
    Document {
        id: id.to_doc_id(),
        fields: MessageRecord::new_fields(
            id,
            &sealed,
            &UserId::from("alice"),
            "Alice",
            &[UserId::from("bob")],
            false,
            encode_timestamp(at),
        ),
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn view_is_chronological_for_any_arrival_order(
        order in Just((0..12usize).collect::<Vec<_>>()).prop_shuffle(),
        gaps in proptest::collection::vec(1i64..5_000, 12),
    ) {
        let mut at = base();
        let docs: Vec<Document> = gaps
            .iter()
            .enumerate()
            .map(|(seq, gap)| {
                at += Duration::milliseconds(*gap);
                message(seq, at)
            })
            .collect();

        let mut log = MaterializedLog::new(chat(), crypto::derive_chat_key(&chat()));
        for &i in &order {
            log.apply(DocumentChange::Upserted(docs[i].clone()));

            let messages = log.messages();
            prop_assert!(messages.windows(2).all(|w| w[0].timestamp <= w[1].timestamp));
        }

        let seqs: Vec<String> = log.messages().iter().map(|m| m.body.summary()).collect();
        let expected: Vec<String> = (0..12).map(|i| i.to_string()).collect();
        prop_assert_eq!(seqs, expected);
    }

    #[test]
    fn removals_keep_remaining_order(
        removed in proptest::collection::btree_set(0..10usize, 0..10),
    ) {
        let docs: Vec<Document> = (0..10)
            .map(|seq| message(seq, base() + Duration::seconds(seq as i64)))
            .collect();

        let mut log = MaterializedLog::new(chat(), crypto::derive_chat_key(&chat()));
        for doc in docs.iter().rev() {
            log.apply(DocumentChange::Upserted(doc.clone()));
        }
        for &i in &removed {
            log.apply(DocumentChange::Removed(docs[i].id.clone()));
        }

        let seqs: Vec<String> = log.messages().iter().map(|m| m.body.summary()).collect();
        let expected: Vec<String> = (0..10)
            .filter(|i| !removed.contains(i))
            .map(|i| i.to_string())
            .collect();
        prop_assert_eq!(seqs, expected);
    }
}
