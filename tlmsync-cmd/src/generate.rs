use std::io::{BufWriter, Write};

use anyhow::{bail, Context, Result};
use rand::Rng;
use tlmsync::framing::{LengthEncoding, Packet, ESC, MAX_PACKET_LEN, TIME_CODE_LEN};
use tracing::info;

#[derive(Debug, Clone)]
pub struct Opts {
    pub count: usize,
    pub max_payload: usize,
    pub max_noise: usize,
    /// Probability of skipping a sequence number before each packet. A decoder only
    /// sees the gap if the packet directly follows the previous one, i.e., no noise.
    pub drop: f64,
    pub encoding: LengthEncoding,
}

// Noise never contains an escape so it cannot hide the following lead-in.
fn noise<R: Rng>(rng: &mut R, len: usize) -> Vec<u8> {
    (0..len)
        .map(|_| loop {
            let b: u8 = rng.gen();
            if b != ESC {
                break b;
            }
        })
        .collect()
}

// Milliseconds as a 48-bit big-endian counter.
fn time_code(millis: u64) -> [u8; TIME_CODE_LEN] {
    let mut tc = [0u8; TIME_CODE_LEN];
    tc.copy_from_slice(&millis.to_be_bytes()[8 - TIME_CODE_LEN..]);
    tc
}

/// Write `opts.count` random packets to `dest`.
pub fn generate<W: Write>(dest: W, opts: &Opts) -> Result<()> {
    let max_payload = MAX_PACKET_LEN - opts.encoding.header_len();
    if opts.max_payload > max_payload {
        bail!("max payload must be <= {max_payload}");
    }

    let mut rng = rand::thread_rng();
    let mut out = BufWriter::new(dest);
    let mut sequence: u8 = 0;
    let mut dropped = 0;
    let mut total_bytes = 0;

    for idx in 0..opts.count {
        if opts.drop > 0.0 && rng.gen_bool(opts.drop) {
            sequence = sequence.wrapping_add(1);
            dropped += 1;
        }
        let len = rng.gen_range(0..=opts.max_payload);
        let mut payload = vec![0u8; len];
        rng.fill(&mut payload[..]);

        let packet = Packet::new(
            1,
            rng.gen_range(0..4),
            rng.gen_range(0..8),
            sequence,
            time_code(idx as u64 * 100),
            payload,
        );
        let dat = packet.encode(opts.encoding)?;
        out.write_all(&dat).context("writing packet")?;
        total_bytes += dat.len();

        if opts.max_noise > 0 {
            let len = rng.gen_range(0..=opts.max_noise);
            out.write_all(&noise(&mut rng, len))
                .context("writing noise")?;
            total_bytes += len;
        }
        sequence = sequence.wrapping_add(1);
    }
    out.flush().context("flushing output")?;

    info!(
        "wrote {} packets ({dropped} sequence numbers skipped), {total_bytes} bytes",
        opts.count
    );
    Ok(())
}
