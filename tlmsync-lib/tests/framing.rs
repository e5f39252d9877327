mod common;

use rand::{rngs::StdRng, Rng, SeedableRng};
use test_case::test_case;
use tlmsync::framing::*;

use common::{encode, feed_all, garbage, packet, packets};

#[test]
fn resync_through_garbage_with_any_chunking() {
    let mut rng = StdRng::seed_from_u64(0x5eed);

    for iteration in 0..200 {
        let expected = packet(rng.gen(), garbage(&mut rng, 40));
        let lead = rng.gen_range(0..64);
        let trail = rng.gen_range(0..64);
        let mut dat = garbage(&mut rng, lead);
        dat.extend(encode(&expected));
        dat.extend(garbage(&mut rng, trail));

        let mut framer = Framer::default();
        let mut results = vec![];
        let mut rest = &dat[..];
        while !rest.is_empty() {
            let (chunk, tail) = rest.split_at(rng.gen_range(1..=rest.len()));
            results.extend(feed_all(&mut framer, chunk));
            rest = tail;
        }

        let got = packets(&results);
        assert_eq!(got.len(), 1, "iteration {iteration}: {results:?}");
        assert_eq!(got[0].payload(), expected.payload(), "iteration {iteration}");
        assert_eq!(got[0].sequence(), expected.sequence(), "iteration {iteration}");
        assert_eq!(got[0].offset(), lead, "iteration {iteration}");
        assert!(!got[0].sequence_anomaly(), "iteration {iteration}");
    }
}

#[test]
fn split_header_byte_by_byte() {
    let dat = encode(&packet(7, vec![1, 2, 3, 4, 5]));
    let mut framer = Framer::default();

    for (i, b) in dat.iter().enumerate() {
        let zult = framer.feed(&[*b]).unwrap();
        if i == dat.len() - 1 {
            let FeedResult::Packet(p) = zult else {
                panic!("expected packet on last byte, got {zult:?}");
            };
            assert_eq!(p.payload(), [1, 2, 3, 4, 5]);
        } else {
            assert_eq!(zult, FeedResult::NeedMoreData, "byte {i}");
        }
    }
}

#[test]
fn lead_in_split_across_calls() {
    let dat = encode(&packet(0, vec![9; 3]));
    let mut first = vec![0x20, 0x21];
    first.push(dat[0]);
    let mut framer = Framer::default();

    assert_eq!(framer.feed(&first).unwrap(), FeedResult::NeedMoreData);
    let results = feed_all(&mut framer, &dat[1..]);

    assert_eq!(results.len(), 1, "{results:?}");
    assert_eq!(packets(&results)[0].payload(), [9, 9, 9]);
}

#[test_case(7 ; "below minimum")]
#[test_case(13 ; "shorter than header")]
#[test_case(3000 ; "above maximum")]
fn length_out_of_range_forces_resync(len: u16) {
    let mut dat = vec![ESC, STX];
    dat.extend(len.to_le_bytes());
    dat.extend([0u8; 10]);
    let expected = packet(1, vec![0xab; 12]);
    dat.extend(encode(&expected));
    let mut framer = Framer::default();

    let results = feed_all(&mut framer, &dat);

    assert_eq!(results.len(), 2, "{results:?}");
    assert_eq!(results[0], FeedResult::Resync(ResyncReason::LengthOutOfRange));
    let FeedResult::Packet(got) = &results[1] else {
        panic!("expected packet, got {:?}", results[1]);
    };
    assert_eq!(got.payload(), expected.payload());
    assert_eq!(got.offset(), 14);
    assert_eq!(framer.stats().length_out_of_range, 1);
}

#[test_case(5, 9, false => true ; "gap")]
#[test_case(5, 6, false => false ; "consecutive")]
#[test_case(255, 0, false => false ; "wrap")]
#[test_case(5, 9, true => false ; "inhibited gap")]
#[test_case(5, 5, false => true ; "repeat")]
fn sequence_anomaly(first: u8, second: u8, inhibit: bool) -> bool {
    let mut dat = encode(&packet(first, vec![]));
    dat.extend(encode(&packet(second, vec![]).with_inhibit(inhibit)));
    let mut framer = Framer::default();

    let got = packets(&feed_all(&mut framer, &dat));

    assert_eq!(got.len(), 2);
    assert!(!got[0].sequence_anomaly(), "first packet is never an anomaly");
    assert_eq!(got[1].inhibit(), inhibit);
    got[1].sequence_anomaly()
}

#[test]
fn inhibit_resets_expected_sequence() {
    let mut dat = encode(&packet(5, vec![]));
    dat.extend(encode(&packet(100, vec![]).with_inhibit(true)));
    dat.extend(encode(&packet(101, vec![])));
    dat.extend(encode(&packet(103, vec![])));
    let mut framer = Framer::default();

    let got = packets(&feed_all(&mut framer, &dat));

    let anomalies: Vec<bool> = got.iter().map(Packet::sequence_anomaly).collect();
    assert_eq!(anomalies, [false, false, false, true]);
    assert_eq!(framer.stats().sequence_anomalies, 1);
    assert_eq!(framer.stats().missing_packets, 1);
}

#[test]
fn ring_wrap_matches_unbounded_buffer() {
    let mut rng = StdRng::seed_from_u64(0xf00d);
    let mut dat = vec![];
    let mut expected = vec![];
    for seq in 0..200u8 {
        let gap = rng.gen_range(0..30);
        dat.extend(garbage(&mut rng, gap));
        if rng.gen_bool(0.2) {
            // stray escape that is not a lead-in
            dat.push(ESC);
        }
        let mut payload = vec![0u8; rng.gen_range(0..=MAX_PACKET_LEN - 14)];
        rng.fill(&mut payload[..]);
        let p = packet(seq, payload);
        dat.extend(encode(&p));
        expected.push(p);
    }

    let mut unbounded = Framer::new(FramerOpts::new().with_capacity(dat.len())).unwrap();
    let reference = packets(&feed_all(&mut unbounded, &dat));
    assert_eq!(reference.len(), expected.len());

    let opts = FramerOpts::new()
        .with_capacity(4 * MAX_PACKET_LEN)
        .with_overrun(OverrunPolicy::Reject);
    let mut framer = Framer::new(opts).unwrap();
    let mut got = vec![];
    let mut rest = &dat[..];
    while !rest.is_empty() {
        let len = rng.gen_range(1..=framer.free().min(rest.len()));
        let (chunk, tail) = rest.split_at(len);
        got.extend(packets(&feed_all(&mut framer, chunk)));
        rest = tail;
    }

    assert_eq!(got, reference);
    for (got, expected) in got.iter().zip(expected.iter()) {
        assert_eq!(got.sequence(), expected.sequence());
        assert_eq!(got.payload(), expected.payload());
    }
}

#[test]
fn printable_stream() {
    let mut rng = StdRng::seed_from_u64(7);
    let opts = FramerOpts::new().with_encoding(LengthEncoding::Printable);
    let mut dat = vec![];
    for seq in 10..20u8 {
        dat.extend(garbage(&mut rng, 5));
        dat.extend(
            packet(seq, vec![seq; usize::from(seq)])
                .encode(LengthEncoding::Printable)
                .unwrap(),
        );
    }
    let mut framer = Framer::new(opts).unwrap();

    let got = packets(&feed_all(&mut framer, &dat));

    assert_eq!(got.len(), 10);
    // Garbage between packets breaks sync, so sequences are never compared
    assert!(got.iter().all(|p| !p.sequence_anomaly()));
    assert_eq!(got[9].payload(), vec![19u8; 19]);
}
