use std::io::{stdout, BufWriter, Read, Write};

use anyhow::{Context, Result};
use serde::Serialize;
use tlmsync::framing::{read_packets, Event, FramerOpts, Packet, ResyncReason};
use tracing::info;

use crate::Format;

#[derive(Serialize)]
#[serde(rename_all = "snake_case")]
enum Record<'a> {
    Packet(&'a Packet),
    Resync { reason: ResyncReason },
}

fn write_text<W: Write>(out: &mut W, event: &Event) -> Result<()> {
    match event {
        Event::Packet(p) => writeln!(
            out,
            "{:>10} routing={} node={} channel={} seq={:<3} inhibit={:<5} len={:<4} time={}{}",
            p.offset(),
            p.routing(),
            p.node(),
            p.channel(),
            p.sequence(),
            p.inhibit(),
            p.payload().len(),
            hex::encode(p.time_code()),
            if p.sequence_anomaly() { " ANOMALY" } else { "" },
        ),
        Event::Resync(reason) => writeln!(out, "{:>10} resync: {reason}", "-"),
    }
    .context("writing to stdout")
}

fn write_json<W: Write>(out: &mut W, event: &Event) -> Result<()> {
    let record = match event {
        Event::Packet(p) => Record::Packet(p),
        Event::Resync(reason) => Record::Resync { reason: *reason },
    };
    serde_json::to_writer(&mut *out, &record).context("serializing to json")?;
    writeln!(out).context("writing to stdout")
}

/// Decode all packets from `src` and write them to stdout, one per line.
pub fn decode<R: Read + Send>(
    src: R,
    opts: FramerOpts,
    format: &Format,
    resyncs: bool,
) -> Result<()> {
    decode_to(src, opts, format, resyncs, stdout().lock())
}

fn decode_to<R: Read + Send, W: Write>(
    src: R,
    opts: FramerOpts,
    format: &Format,
    resyncs: bool,
    dest: W,
) -> Result<()> {
    let mut reader = read_packets(src, opts).context("creating framer")?;
    let mut out = BufWriter::new(dest);

    for zult in reader.by_ref() {
        let event = match zult {
            Ok(event) => event,
            Err(err) => {
                out.flush().context("writing to stdout")?;
                return Err(err).context("reading stream");
            }
        };
        if matches!(event, Event::Resync(_)) && !resyncs {
            continue;
        }
        match format {
            Format::Text => write_text(&mut out, &event)?,
            Format::Json => write_json(&mut out, &event)?,
        }
    }
    out.flush().context("writing to stdout")?;

    let stats = reader.framer().stats();
    info!(
        "packets={} anomalies={} missing={} resyncs={} discarded_bytes={}",
        stats.packets,
        stats.sequence_anomalies,
        stats.missing_packets,
        stats.resyncs(),
        stats.discarded_bytes,
    );
    Ok(())
}
