use feednorm::prelude::*;
use std::time::Duration;

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn instrument() -> InstrumentId {
        InstrumentId::new("BTC/USD", "XBTS")
    }

    fn depth_command(id: u64) -> SubscribeCommand {
        SubscribeCommand::new(RequestId(id), instrument(), DataKind::Depth)
    }

    fn snapshot(levels: usize, ids: &[u64]) -> BookUpdate {
        let mut update = BookUpdate::new(instrument(), 1_000);
        update.state = Some(BookState::SnapshotComplete);
        for i in 0..levels {
            update.bids.push(BookLevel::new(100 - i as u128, 10));
            update.asks.push(BookLevel::new(101 + i as u128, 10));
        }
        update.subscription_ids = ids.iter().map(|id| RequestId(*id)).collect();
        update
    }

    fn day(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    // --- depth lane: reconstruction, truncation, delivery ---

    #[test]
    fn test_snapshot_reaches_each_subscriber_at_its_depth() {
        let engine = BookIncrementEngine::new();
        let truncator = DepthTruncator::new();
        let fanout = FanoutStd::new();

        // two subscribers on the same instrument, one depth-limited
        let mut shallow = depth_command(1);
        shallow.depth = Some(2);
        engine.subscribe(&shallow).unwrap();
        engine.subscribe(&depth_command(2)).unwrap();
        engine.mark_online(RequestId(1)).unwrap();
        engine.mark_online(RequestId(2)).unwrap();
        truncator.set_depth(RequestId(1), 2).unwrap();

        let rx1 = fanout.subscribe(RequestId(1));
        let rx2 = fanout.subscribe(RequestId(2));

        // one snapshot in, one shared book out, stamped with both ids
        let processed = engine.process_book(snapshot(4, &[1])).unwrap();
        assert!(processed.forward.is_none());
        assert_eq!(processed.built.len(), 1);
        let book = processed.built.into_iter().next().unwrap();
        assert_eq!(book.subscription_ids, vec![RequestId(1), RequestId(2)]);

        // the truncator splits that book per configured depth
        let copies = truncator.process_book(book).unwrap();
        assert_eq!(copies.len(), 2);
        let mut delivered = 0;
        for copy in copies {
            delivered += fanout.dispatch(&Message::Book(copy));
        }
        assert_eq!(delivered, 2);

        let Message::Book(shallow_book) = rx1.try_recv().unwrap() else {
            panic!("subscriber 1 expected a book");
        };
        let Message::Book(full_book) = rx2.try_recv().unwrap() else {
            panic!("subscriber 2 expected a book");
        };
        assert_eq!(shallow_book.bids.len(), 2);
        assert_eq!(shallow_book.asks.len(), 2);
        assert_eq!(full_book.bids.len(), 4);
        assert_eq!(full_book.asks.len(), 4);
        assert_eq!(shallow_book.bids[0], full_book.bids[0]);
        assert!(rx1.try_recv().is_err());
        assert!(rx2.try_recv().is_err());
    }

    #[test]
    fn test_unsubscribe_trims_the_whole_path() {
        let engine = BookIncrementEngine::new();
        let truncator = DepthTruncator::new();
        let fanout = FanoutStd::new();

        let mut shallow = depth_command(1);
        shallow.depth = Some(2);
        engine.subscribe(&shallow).unwrap();
        engine.subscribe(&depth_command(2)).unwrap();
        engine.mark_online(RequestId(1)).unwrap();
        engine.mark_online(RequestId(2)).unwrap();
        truncator.set_depth(RequestId(1), 2).unwrap();
        let rx1 = fanout.subscribe(RequestId(1));
        let rx2 = fanout.subscribe(RequestId(2));

        engine.unsubscribe(RequestId(1)).unwrap();
        truncator.clear_depth(RequestId(1)).unwrap();
        assert!(fanout.unsubscribe(RequestId(1)));

        // the surviving subscriber keeps the shared entry alive
        let processed = engine.process_book(snapshot(3, &[2])).unwrap();
        assert_eq!(processed.built.len(), 1);
        let book = processed.built.into_iter().next().unwrap();
        assert_eq!(book.subscription_ids, vec![RequestId(2)]);

        let copies = truncator.process_book(book).unwrap();
        assert_eq!(copies.len(), 1);
        assert_eq!(fanout.dispatch(&Message::Book(copies[0].clone())), 1);
        assert!(rx2.try_recv().is_ok());
        drop(rx1);
    }

    // --- level1 lane: rewrite down, synthesis up ---

    #[test]
    fn test_level1_rewrite_round_trip() {
        let level1 = Level1DepthEngine::new();
        let fanout = FanoutStd::new();

        // a depth request leaves the gate as a level1 request
        let command = depth_command(7);
        let rewritten = level1.subscribe(&command).unwrap().unwrap();
        assert_eq!(rewritten.kind, DataKind::Level1);
        assert_eq!(rewritten.request_id, RequestId(7));
        assert_eq!(command.kind, DataKind::Depth);
        level1.mark_online(RequestId(7)).unwrap();
        let rx = fanout.subscribe(RequestId(7));

        // the venue answers with an unrouted quote
        let mut quote = Level1Update::new(instrument(), 2_000);
        quote.set(Level1Field::BestBidPrice, FieldValue::Price(100));
        quote.set(Level1Field::BestBidVolume, FieldValue::Volume(5));
        quote.set(Level1Field::BestAskPrice, FieldValue::Price(101));
        quote.set(Level1Field::BestAskVolume, FieldValue::Volume(3));
        let processed = level1.process_update(quote).unwrap();

        assert!(processed.forward.is_some());
        assert_eq!(processed.built.len(), 1);
        let book = processed.built.into_iter().next().unwrap();
        assert!(book.is_full());
        assert_eq!(book.built_from, Some(DataKind::Level1));
        assert_eq!(book.bids, vec![BookLevel::new(100, 5)]);
        assert_eq!(book.asks, vec![BookLevel::new(101, 3)]);

        assert_eq!(fanout.dispatch(&Message::Book(book)), 1);
        assert!(matches!(rx.try_recv().unwrap(), Message::Book(_)));
    }

    // --- offline gate in front of the lanes ---

    #[test]
    fn test_offline_buffer_releases_the_lane_on_connect() {
        let offline = OfflineBuffer::new();
        let engine = BookIncrementEngine::new();

        // disconnected: the subscription is held, not sent
        let message = Message::Subscribe(depth_command(1));
        let decision = offline.handle_outbound(message.clone()).unwrap();
        assert_eq!(decision, OfflineDecision::Buffered);
        assert_eq!(offline.buffered_count().unwrap(), 1);

        // the connect ack schedules a replay of everything held
        let outcome = offline
            .handle_inbound(&Message::Connect { error: None })
            .unwrap();
        assert_eq!(outcome.emit, vec![Message::ProcessBuffered]);
        let replayed = match offline.handle_outbound(Message::ProcessBuffered).unwrap() {
            OfflineDecision::Replay(messages) => messages,
            other => panic!("expected a replay, got {other:?}"),
        };
        assert_eq!(replayed, vec![message]);

        // the replayed command drives the depth lane as if sent fresh
        for message in replayed {
            if let Message::Subscribe(command) = message {
                engine.subscribe(&command).unwrap();
            }
        }
        engine.mark_online(RequestId(1)).unwrap();
        let processed = engine.process_book(snapshot(2, &[1])).unwrap();
        assert_eq!(processed.built.len(), 1);
        assert_eq!(processed.built[0].subscription_ids, vec![RequestId(1)]);
    }

    #[test]
    fn test_connection_loss_suppression_and_restore() {
        let offline = OfflineBuffer::new();
        offline.set_connected(true).unwrap();

        let subscribe = Message::Subscribe(depth_command(3));
        assert_eq!(
            offline.handle_outbound(subscribe.clone()).unwrap(),
            OfflineDecision::Forward(subscribe.clone())
        );

        // a loss that resets state is swallowed before subscribers see it
        let lost = Message::ConnectionLost { reset_state: true };
        let outcome = offline.handle_inbound(&lost).unwrap();
        assert!(outcome.suppress);
        assert!(!offline.is_connected().unwrap());

        assert_eq!(
            offline.handle_outbound(subscribe.clone()).unwrap(),
            OfflineDecision::Buffered
        );

        let outcome = offline
            .handle_inbound(&Message::ConnectionRestored)
            .unwrap();
        assert!(!outcome.suppress);
        assert_eq!(outcome.emit, vec![Message::ProcessBuffered]);
        let replayed = match offline.handle_outbound(Message::ProcessBuffered).unwrap() {
            OfflineDecision::Replay(messages) => messages,
            other => panic!("expected a replay, got {other:?}"),
        };
        assert_eq!(replayed, vec![subscribe]);
    }

    // --- reference-data lane: gaps feed lookups, lookups serialize ---

    #[test]
    fn test_gap_scan_feeds_the_lookup_queue() {
        let mut scanner = GapScanner::new(MemoryCoverage::new());
        let scheduler = LookupScheduler::new();

        // Tuesday is missing between two persisted weekdays
        scanner
            .coverage_mut()
            .record(instrument(), DataKind::Trades, day(2024, 1, 1));
        scanner
            .coverage_mut()
            .record(instrument(), DataKind::Trades, day(2024, 1, 3));
        let gap = scanner
            .next_gap(
                &instrument(),
                DataKind::Trades,
                day(2024, 1, 1),
                day(2024, 1, 4),
                WeekendPolicy::Skip,
            )
            .unwrap()
            .unwrap();
        assert_eq!(
            gap,
            DateGap {
                start: day(2024, 1, 2),
                end: day(2024, 1, 2),
            }
        );

        // the gap turns into a lookup that goes straight out
        let request = LookupRequest::new(RequestId(10), LookupKind::Security);
        assert!(!scheduler.enqueue(request.clone()).unwrap());
        scheduler.add(request, Duration::from_millis(100)).unwrap();

        // a second lookup of the same kind waits its turn
        let queued = LookupRequest::new(RequestId(11), LookupKind::Security);
        assert!(scheduler.enqueue(queued).unwrap());
    }

    #[test]
    fn test_lookup_timeout_promotes_the_next_in_line() {
        let scheduler = LookupScheduler::new();
        let first = LookupRequest::new(RequestId(1), LookupKind::Board);
        let second = LookupRequest::new(RequestId(2), LookupKind::Board);

        assert!(!scheduler.enqueue(first.clone()).unwrap());
        scheduler.add(first, Duration::from_millis(100)).unwrap();
        assert!(scheduler.enqueue(second.clone()).unwrap());

        // the stalled head times out and hands the slot to its successor
        let timed_out = scheduler
            .tick(Duration::from_millis(150), &[])
            .unwrap();
        assert_eq!(timed_out.len(), 1);
        assert_eq!(timed_out[0].request.request_id, RequestId(1));
        assert_eq!(timed_out[0].next.as_ref(), Some(&second));

        let next = timed_out.into_iter().next().unwrap().next.unwrap();
        scheduler.add(next, Duration::from_millis(100)).unwrap();
        assert!(scheduler.complete(RequestId(2)).unwrap().is_some());
        assert!(
            scheduler
                .dequeue_next(LookupKind::Board, RequestId(2))
                .unwrap()
                .is_none()
        );
    }
}
