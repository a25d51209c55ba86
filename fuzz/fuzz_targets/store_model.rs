//! Message store against the reference model on arbitrary operation lists.

#![no_main]

use libfuzzer_sys::fuzz_target;
use zcret_core::{MessageStore, StoreConfig};
use zcret_harness::{StoreModel, StoreOperation, model::received_time};

fuzz_target!(|input: (u8, Vec<StoreOperation>)| {
    let (capacity, ops) = input;
    let capacity = usize::from(capacity % 16) + 1;

    let mut model = StoreModel::new(capacity);
    let mut store = MessageStore::new(StoreConfig { max_messages: capacity });

    for op in &ops {
        model.apply(op);
        match op {
            StoreOperation::Batch(batch) => {
                store.ingest_batch(batch.iter().map(|m| m.to_incoming()).collect());
            },
            StoreOperation::Push { message, received_at } => {
                store.ingest_incremental(message.to_incoming(), received_time(*received_at));
            },
            StoreOperation::Clear => store.clear(),
        }
        assert_eq!(model.messages(), store.query(), "diverged after {op:?}");
    }
});
