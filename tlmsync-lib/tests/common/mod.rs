#![allow(dead_code)]

use rand::Rng;
use tlmsync::framing::{FeedResult, Framer, LengthEncoding, Packet, ESC, STX, TIME_CODE_LEN};

pub fn packet(sequence: u8, payload: Vec<u8>) -> Packet {
    Packet::new(1, 4, 0x7e, sequence, [0x11; TIME_CODE_LEN], payload)
}

pub fn encode(packet: &Packet) -> Vec<u8> {
    packet
        .encode(LengthEncoding::Binary)
        .expect("test packet should encode")
}

/// Random bytes that never contain a lead-in. Stray escape bytes are common.
pub fn garbage<R: Rng>(rng: &mut R, len: usize) -> Vec<u8> {
    let mut dat: Vec<u8> = Vec::with_capacity(len);
    while dat.len() < len {
        let b: u8 = if rng.gen_ratio(1, 8) { ESC } else { rng.gen() };
        if b == STX && dat.last() == Some(&ESC) {
            continue;
        }
        dat.push(b);
    }
    dat
}

/// Feed `dat` then poll until the framer needs more data, returning everything else
/// it produced.
pub fn feed_all(framer: &mut Framer, dat: &[u8]) -> Vec<FeedResult> {
    let mut results = vec![];
    let mut zult = framer.feed(dat).expect("feed should not fail");
    while zult != FeedResult::NeedMoreData {
        results.push(zult);
        zult = framer.poll().expect("poll should not fail");
    }
    results
}

pub fn packets(results: &[FeedResult]) -> Vec<Packet> {
    results
        .iter()
        .filter_map(|r| match r {
            FeedResult::Packet(p) => Some(p.clone()),
            _ => None,
        })
        .collect()
}
