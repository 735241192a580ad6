use feednorm::normalize::truncate::truncate;
use feednorm::prelude::*;

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::collection::vec;
    use proptest::prelude::*;
    use std::collections::BTreeSet;

    fn instrument() -> InstrumentId {
        InstrumentId::new("BTC/USD", "XBTS")
    }

    fn depth_command(id: u64) -> SubscribeCommand {
        SubscribeCommand::new(RequestId(id), instrument(), DataKind::Depth)
    }

    fn fragment(state: BookState, levels: &[(u128, u64)]) -> BookUpdate {
        let mut update = BookUpdate::new(instrument(), 1);
        update.state = Some(state);
        for (price, volume) in levels {
            update.bids.push(BookLevel::new(*price, *volume));
            update.asks.push(BookLevel::new(*price + 50, *volume));
        }
        update
    }

    proptest! {
        #[test]
        fn prop_built_books_stay_sorted_and_dense(
            snapshot in vec((1u128..50, 0u64..5), 0..20),
            diffs in vec(vec((1u128..50, 0u64..5), 0..10), 0..5),
        ) {
            let engine = BookIncrementEngine::new();
            engine.subscribe(&depth_command(1)).unwrap();

            let mut books: Vec<BookUpdate> = Vec::new();
            let outcome = engine
                .apply_increment(RequestId(1), &fragment(BookState::SnapshotComplete, &snapshot))
                .unwrap();
            if let ApplyOutcome::Built { book, .. } = outcome {
                books.push(book);
            }
            for levels in &diffs {
                let outcome = engine
                    .apply_increment(RequestId(1), &fragment(BookState::Increment, levels))
                    .unwrap();
                if let ApplyOutcome::Built { book, .. } = outcome {
                    books.push(book);
                }
            }

            // whatever the fragments did, emitted books are ordered and
            // carry no deleted levels
            for book in &books {
                prop_assert!(book.bids.windows(2).all(|pair| pair[0].price > pair[1].price));
                prop_assert!(book.asks.windows(2).all(|pair| pair[0].price < pair[1].price));
                prop_assert!(book.bids.iter().all(|level| level.volume > 0));
                prop_assert!(book.asks.iter().all(|level| level.volume > 0));
            }
        }

        #[test]
        fn prop_tracking_stays_consistent_under_churn(
            ops in vec((0u8..3, 1u64..8), 1..60),
        ) {
            let engine = BookIncrementEngine::new();
            let mut tracked: BTreeSet<u64> = BTreeSet::new();
            let mut online: BTreeSet<u64> = BTreeSet::new();

            for (op, id) in ops {
                match op {
                    0 => {
                        if tracked.insert(id) {
                            engine.subscribe(&depth_command(id)).unwrap();
                        }
                    }
                    1 => {
                        if tracked.contains(&id) && online.insert(id) {
                            engine.mark_online(RequestId(id)).unwrap();
                        }
                    }
                    _ => {
                        if tracked.remove(&id) {
                            online.remove(&id);
                            engine.unsubscribe(RequestId(id)).unwrap();
                        }
                    }
                }
            }

            // the by-id view agrees with the model after any interleaving
            for id in 1..8u64 {
                prop_assert_eq!(
                    engine.is_tracking(RequestId(id)).unwrap(),
                    tracked.contains(&id)
                );
            }

            // every surviving online subscriber shares the coalesced entry,
            // so one application fans out to each of them exactly once
            if let Some(&probe) = online.iter().next() {
                let snapshot = fragment(BookState::SnapshotComplete, &[(40, 2)]);
                let outcome = engine.apply_increment(RequestId(probe), &snapshot).unwrap();
                let expected: Vec<RequestId> = online.iter().map(|&id| RequestId(id)).collect();
                match outcome {
                    ApplyOutcome::Built { fan_out, .. } => prop_assert_eq!(fan_out, expected),
                    other => prop_assert!(false, "online id did not rebuild: {:?}", other),
                }
            }
        }

        #[test]
        fn prop_truncation_caps_depth_and_keeps_prefix(
            levels in 0usize..30,
            depth in 1usize..25,
        ) {
            let mut book = BookUpdate::new(instrument(), 9);
            for i in 0..levels {
                book.bids.push(BookLevel::new(1_000 - i as u128, 7));
                book.asks.push(BookLevel::new(1_001 + i as u128, 7));
            }

            let sliced = truncate(&book, depth);
            prop_assert_eq!(sliced.bids.len(), levels.min(depth));
            prop_assert_eq!(sliced.asks.len(), levels.min(depth));
            prop_assert_eq!(&sliced.bids[..], &book.bids[..sliced.bids.len()]);
            prop_assert_eq!(&sliced.asks[..], &book.asks[..sliced.asks.len()]);
        }

        #[test]
        fn prop_depth_groups_partition_the_id_set(
            depths in vec(proptest::option::of(1usize..6), 1..12),
        ) {
            let truncator = DepthTruncator::new();
            let mut ids: Vec<RequestId> = Vec::new();
            for (index, depth) in depths.iter().enumerate() {
                let id = RequestId(index as u64 + 1);
                ids.push(id);
                if let Some(depth) = depth {
                    truncator.set_depth(id, *depth).unwrap();
                }
            }

            let groups = truncator.group_by_depth(&ids).unwrap();

            // every id lands in exactly one group, under its own depth
            let mut regrouped: Vec<RequestId> = Vec::new();
            for (depth, members) in &groups {
                prop_assert!(!members.is_empty());
                for id in members {
                    prop_assert_eq!(truncator.get_depth(*id).unwrap(), *depth);
                    regrouped.push(*id);
                }
            }
            regrouped.sort();
            prop_assert_eq!(regrouped, ids);

            let mut distinct: Vec<Option<usize>> = depths.clone();
            distinct.sort();
            distinct.dedup();
            prop_assert_eq!(groups.len(), distinct.len());
        }

        #[test]
        fn prop_offline_replay_preserves_arrival_order(
            ids in vec(1u64..500, 0..40),
        ) {
            let offline = OfflineBuffer::new();
            let mut expected: Vec<Message> = Vec::new();
            for id in &ids {
                let message =
                    Message::Lookup(LookupRequest::new(RequestId(*id), LookupKind::Security));
                prop_assert_eq!(
                    offline.handle_outbound(message.clone()).unwrap(),
                    OfflineDecision::Buffered
                );
                expected.push(message);
            }

            prop_assert_eq!(
                offline.handle_outbound(Message::ProcessBuffered).unwrap(),
                OfflineDecision::Replay(expected)
            );
            prop_assert_eq!(offline.buffered_count().unwrap(), 0);
        }

        #[test]
        fn prop_consecutive_duplicate_quotes_never_emit(
            quotes in vec((1u128..100, 1u64..50, 1u128..100, 1u64..50), 1..20),
        ) {
            let engine = Level1DepthEngine::new();
            engine.subscribe(&depth_command(1)).unwrap();

            let mut last: Option<(u128, u64, u128, u64)> = None;
            for quote in quotes {
                let (bid_price, bid_volume, ask_price, ask_volume) = quote;
                let mut update = Level1Update::new(instrument(), 3);
                update.set(Level1Field::BestBidPrice, FieldValue::Price(bid_price));
                update.set(Level1Field::BestBidVolume, FieldValue::Volume(bid_volume));
                update.set(Level1Field::BestAskPrice, FieldValue::Price(ask_price));
                update.set(Level1Field::BestAskVolume, FieldValue::Volume(ask_volume));

                let built = engine.process_field_update(RequestId(1), &update).unwrap();
                if last == Some(quote) {
                    prop_assert!(built.is_none());
                } else {
                    let book = built.unwrap();
                    prop_assert_eq!(book.bids, vec![BookLevel::new(bid_price, bid_volume)]);
                    prop_assert_eq!(book.asks, vec![BookLevel::new(ask_price, ask_volume)]);
                }
                last = Some(quote);
            }
        }
    }
}
