use std::collections::BTreeMap;
use std::fs::File;
use std::io::{stdout, BufReader, Read, Write};
use std::path::Path;

use anyhow::{Context, Result};
use handlebars::{handlebars_helper, Handlebars};
use serde::Serialize;
use tlmsync::framing::{read_packets, Event, FramerOpts, FramerStats};
use tracing::debug;

use crate::Format;

#[derive(Default, Debug, Clone, Serialize)]
struct ChannelSummary {
    routing: u8,
    node: u8,
    channel: u8,
    total_packets: usize,
    payload_bytes: usize,
    inhibited: usize,
}

#[derive(Default, Debug, Clone, Serialize)]
struct Resyncs {
    bad_lead_in: usize,
    length_out_of_range: usize,
    overrun: usize,
}

#[derive(Default, Debug, Clone, Serialize)]
struct Info {
    filename: String,
    total_bytes: usize,
    total_packets: usize,
    sequence_anomalies: usize,
    missing_packets: usize,
    discarded_bytes: usize,
    resyncs: Resyncs,
    channels: Vec<ChannelSummary>,
}

fn summarize<R: Read + Send>(filename: String, src: R, opts: FramerOpts) -> Result<Info> {
    let mut reader = read_packets(src, opts).context("creating framer")?;
    let mut channels: BTreeMap<(u8, u8, u8), ChannelSummary> = BTreeMap::default();
    let mut total_bytes = 0;

    for zult in reader.by_ref() {
        match zult {
            Ok(Event::Packet(packet)) => {
                let key = (packet.routing(), packet.node(), packet.channel());
                let summary = channels.entry(key).or_insert_with(|| ChannelSummary {
                    routing: key.0,
                    node: key.1,
                    channel: key.2,
                    ..Default::default()
                });
                summary.total_packets += 1;
                summary.payload_bytes += packet.payload().len();
                if packet.inhibit() {
                    summary.inhibited += 1;
                }
            }
            Ok(Event::Resync(reason)) => debug!("resync: {reason}"),
            Err(err) => return Err(err).context("reading stream"),
        }
    }

    let framer = reader.framer();
    // Every byte became part of a packet, was discarded, or is left over at EOF
    let FramerStats {
        packets,
        sequence_anomalies,
        missing_packets,
        bad_lead_in,
        length_out_of_range,
        overruns,
        discarded_bytes,
        ..
    } = framer.stats().clone();
    for summary in channels.values() {
        total_bytes += summary.payload_bytes;
    }
    total_bytes += discarded_bytes + framer.buffered();
    total_bytes += packets * framer.encoding().header_len();

    Ok(Info {
        filename,
        total_bytes,
        total_packets: packets,
        sequence_anomalies,
        missing_packets,
        discarded_bytes,
        resyncs: Resyncs {
            bad_lead_in,
            length_out_of_range,
            overrun: overruns,
        },
        channels: channels.into_values().collect(),
    })
}

pub fn info(fpath: &Path, opts: FramerOpts, format: &Format) -> Result<()> {
    let file = File::open(fpath).with_context(|| format!("opening input {fpath:?}"))?;
    let info = summarize(
        fpath.to_string_lossy().to_string(),
        BufReader::new(file),
        opts,
    )?;

    match format {
        Format::Json => {
            serde_json::to_writer_pretty(stdout(), &info).context("serializing to json")
        }
        Format::Text => {
            let data = render_text(&info).context("serializing info")?;
            stdout()
                .write_all(data.as_bytes())
                .context("writing to stdout")
        }
    }
}

fn render_text(info: &Info) -> Result<String> {
    handlebars_helper!(left_pad: |num: u64, v: Json| {
        let v = match v {
            serde_json::Value::String(s) => s.to_owned(),
            serde_json::Value::Null => String::new(),
            _ => v.to_string()
        };
        let width = usize::try_from(num).unwrap_or_default();
        format!("{v:>width$}")
    });
    let mut hb = Handlebars::new();
    hb.register_escape_fn(handlebars::no_escape);
    hb.register_helper("lpad", Box::new(left_pad));
    hb.register_template_string("info", TEXT_TEMPLATE)
        .context("registering template")?;

    hb.render("info", &info).context("rendering text")
}

const TEXT_TEMPLATE: &str = r"{{ filename }}
==========================================================================
Bytes:      {{ total_bytes }}
Packets:    {{ total_packets }}
Anomalies:  {{ sequence_anomalies }}
Missing:    {{ missing_packets }}
Discarded:  {{ discarded_bytes }} bytes
Resyncs:    bad lead-in={{ resyncs.bad_lead_in }} length out of range={{ resyncs.length_out_of_range }} overrun={{ resyncs.overrun }}
--------------------------------------------------------------------------
Routing   Node   Channel      Packets          Bytes   Inhibited
--------------------------------------------------------------------------
{{ #each channels }}{{ lpad 7 routing }}   {{ lpad 4 node }}   {{ lpad 7 channel }}   {{ lpad 10 total_packets }}   {{ lpad 12 payload_bytes }}   {{ lpad 9 inhibited }}
{{/each }}
";

#[cfg(test)]
mod tests {
    use std::io::{self, Cursor};

    use tlmsync::framing::{LengthEncoding, Packet, ESC, STX};

    use super::*;

    struct Broken;

    impl Read for Broken {
        fn read(&mut self, _buf: &mut [u8]) -> io::Result<usize> {
            Err(io::Error::new(io::ErrorKind::ConnectionReset, "link down"))
        }
    }

    fn stream() -> Vec<u8> {
        let mut dat = vec![0x00, 0x01, 0x02];
        for seq in [0u8, 1, 2, 4] {
            let channel = seq % 2;
            let p = Packet::new(1, 2, channel, seq, [0; 6], vec![seq; 10]);
            dat.extend(p.encode(LengthEncoding::Binary).unwrap());
        }
        // length out of range
        dat.extend([ESC, STX, 0x00, 0x00]);
        dat.extend([0u8; 10]);
        dat
    }

    #[test]
    fn test_summarize() {
        let dat = stream();
        let len = dat.len();

        let info = summarize("test".into(), Cursor::new(dat), FramerOpts::default()).unwrap();

        assert_eq!(info.total_bytes, len);
        assert_eq!(info.total_packets, 4);
        assert_eq!(info.sequence_anomalies, 1);
        assert_eq!(info.missing_packets, 1);
        assert_eq!(info.resyncs.length_out_of_range, 1);
        assert_eq!(info.channels.len(), 2);
        assert_eq!(info.channels[0].channel, 0);
        assert_eq!(info.channels[0].total_packets, 3);
        assert_eq!(info.channels[1].total_packets, 1);
        assert_eq!(info.channels[1].payload_bytes, 10);
    }

    #[test]
    fn test_summarize_read_error() {
        let src = Cursor::new(stream()).chain(Broken);

        let zult = summarize("test".into(), src, FramerOpts::default());

        let err = zult.expect_err("read error should fail the summary");
        assert!(format!("{err:#}").contains("link down"), "{err:#}");
    }

    #[test]
    fn test_render_text() {
        let info = summarize("a&b.dat".into(), Cursor::new(stream()), FramerOpts::default())
            .unwrap();

        let text = render_text(&info).unwrap();

        assert!(text.starts_with("a&b.dat\n"), "{text}");
        assert!(text.contains("Packets:    4\n"), "{text}");
        assert!(text.contains("length out of range=1"), "{text}");
        let rows: Vec<Vec<&str>> = text
            .lines()
            .skip_while(|l| !l.starts_with("Routing"))
            .skip(2)
            .map(|l| l.split_whitespace().collect())
            .filter(|cols: &Vec<&str>| !cols.is_empty())
            .collect();
        assert_eq!(
            rows,
            [["1", "2", "0", "3", "30", "0"], ["1", "2", "1", "1", "10", "0"]],
            "{text}"
        );
    }
}
