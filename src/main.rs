use anyhow::{bail, Context, Result};
use clap::Parser;
use rand::Rng;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha3::digest::{ExtendableOutput, Update, XofReader};
use sha3::Shake256;
use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{BufReader, Write};
use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{debug, info, warn};

// ─── CLI ──────────────────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(author, version, about = "Mask or salted-pseudonymize dissected protocol fields in legacy .pcap captures, rewriting raw frame bytes in place without disturbing frame layout.")]
struct Args {
    /// Dissected packet JSON (tshark -T json -x shape: array of {"_source":{"layers":{...}}})
    #[arg(short, long)]
    input: PathBuf,

    /// Output (anonymized) .pcap file
    #[arg(short, long)]
    output: PathBuf,

    /// Field to mask with 0xff, e.g. "ip.src_raw" or "tcp.payload_raw[0:8]" (repeatable)
    #[arg(short, long = "mask")]
    mask: Vec<String>,

    /// Field to pseudonymize via salted SHAKE256, same selector syntax (repeatable)
    #[arg(short = 'a', long = "pseudonymize")]
    pseudonymize: Vec<String>,

    /// Salt shared by every pseudonymized field this run (random if omitted)
    #[arg(short, long)]
    salt: Option<String>,

    /// JSON rule file: {"mask": [...], "pseudonymize": [...], "salt": "..."}
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Original capture; supplies record timestamps when the dissection lacks frame.time_epoch
    #[arg(long)]
    source_pcap: Option<PathBuf>,

    /// Print run summary as JSON to stdout
    #[arg(long, default_value_t = false)]
    report: bool,

    /// Enable debug logging
    #[arg(short, long, default_value_t = false)]
    verbose: bool,
}

// ─── Rule configuration ───────────────────────────────────────────────────────

/// Optional rule file, merged with the repeatable CLI flags.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct FileConfig {
    mask: Vec<String>,
    pseudonymize: Vec<String>,
    salt: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RuleKind {
    Mask,
    Pseudonymize,
}

/// One anonymization rule: a canonical field name (with its `_raw` suffix, as
/// the dissector reports it) plus an optional nibble sub-range selector.
#[derive(Debug, Clone)]
struct FieldRule {
    target: String,
    kind: RuleKind,
    range_start: Option<i64>,
    range_end: Option<i64>,
}

/// Selector syntax: `name[start:end]`, both bounds optional, either may be
/// negative (counted from the end of the field's own hex value).
const SELECTOR_PATTERN: &str = r"(\S+)\[(-?\d+)?:(-?\d+)?\]";

impl FieldRule {
    fn parse(spec: &str, kind: RuleKind, selector: &Regex) -> Self {
        if let Some(c) = selector.captures(spec) {
            FieldRule {
                target: c[1].to_string(),
                kind,
                range_start: c.get(2).and_then(|m| m.as_str().parse().ok()),
                range_end: c.get(3).and_then(|m| m.as_str().parse().ok()),
            }
        } else {
            FieldRule {
                target: spec.to_string(),
                kind,
                range_start: None,
                range_end: None,
            }
        }
    }

    /// Transform one field's raw hex value into (replacement, protection pattern).
    /// The replacement always has the exact length of the input; the pattern
    /// carries 'f' nibbles over the transformed sub-range and '0' elsewhere.
    fn apply(&self, hex: &str, semantic_type: i64, salt: &str) -> (String, String) {
        let (s, e) = resolve_range(hex.len(), self.range_start, self.range_end);
        let part = &hex[s..e];
        let replaced = match self.kind {
            RuleKind::Mask => "f".repeat(part.len()),
            RuleKind::Pseudonymize => pseudonymize_hex(part, semantic_type, salt),
        };
        let value = format!("{}{}{}", &hex[..s], replaced, &hex[e..]);
        let pattern = format!(
            "{}{}{}",
            "0".repeat(s),
            "f".repeat(replaced.len()),
            "0".repeat(hex.len() - e)
        );
        (value, pattern)
    }
}

/// The run-wide rule set: immutable for the duration of a run, applied
/// identically to every packet. When the same target is both masked and
/// pseudonymized, the pseudonymize rule wins (inserted second).
struct RuleSet {
    rules: HashMap<String, FieldRule>,
    salt: String,
}

impl RuleSet {
    fn new(mask: &[String], pseudonymize: &[String], salt: Option<String>) -> Result<Self> {
        let selector = Regex::new(SELECTOR_PATTERN).context("selector regex")?;
        let mut rules = HashMap::new();
        for spec in mask {
            let rule = FieldRule::parse(spec, RuleKind::Mask, &selector);
            rules.insert(rule.target.clone(), rule);
        }
        for spec in pseudonymize {
            let rule = FieldRule::parse(spec, RuleKind::Pseudonymize, &selector);
            rules.insert(rule.target.clone(), rule);
        }
        let salt = salt.unwrap_or_else(generate_salt);
        Ok(RuleSet { rules, salt })
    }
}

/// Default salt: 13 base-36 characters. Not a cryptographic secret by
/// contract; pass --salt for anything beyond casual de-identification.
fn generate_salt() -> String {
    const CHARS: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";
    let mut rng = rand::thread_rng();
    (0..13).map(|_| CHARS[rng.gen_range(0..CHARS.len())] as char).collect()
}

// ─── Stats ────────────────────────────────────────────────────────────────────

#[derive(Debug, Default, Serialize)]
struct RunStats {
    total_packets: u64,
    packets_emitted: u64,
    packets_skipped: u64,
    fields_inspected: u64,
    fields_masked: u64,
    fields_pseudonymized: u64,
    frames_modified: u64,
}

// ─── Helpers ──────────────────────────────────────────────────────────────────

fn hex_to_bytes(hex: &str) -> Vec<u8> {
    (0..hex.len() / 2)
        .map(|i| u8::from_str_radix(&hex[i * 2..i * 2 + 2], 16).unwrap_or(0))
        .collect()
}

fn json_i64(v: &Value) -> i64 {
    v.as_i64().or_else(|| v.as_f64().map(|f| f as i64)).unwrap_or(0)
}

/// Resolve a `[start:end)` nibble sub-range against a field value of `len`
/// hex characters. Negative bounds count from the end; everything is clamped
/// so malformed selectors degrade to a valid (possibly empty) range.
fn resolve_range(len: usize, start: Option<i64>, end: Option<i64>) -> (usize, usize) {
    let n = len as i64;
    let mut s = start.unwrap_or(0);
    if s < 0 {
        s += n;
    }
    let mut e = end.unwrap_or(n);
    if e < 0 {
        e += n;
    }
    let s = s.clamp(0, n);
    let e = e.clamp(s, n);
    (s as usize, e as usize)
}

// ─── Field transform ──────────────────────────────────────────────────────────

/// Wireshark ftenum codes for text-like fields (FT_STRING family). For these
/// the hash output is re-encoded so every digest character becomes one ASCII
/// character in the frame, keeping the replacement readable as text.
const STRING_FIELD_TYPES: [i64; 3] = [26, 27, 28];

fn shake256_hex(part: &str, salt: &str, n_bytes: usize) -> String {
    let mut hasher = Shake256::default();
    hasher.update(format!("{}:{}", part, salt).as_bytes());
    let mut buf = vec![0u8; n_bytes];
    hasher.finalize_xof().read(&mut buf);
    buf.iter().map(|b| format!("{:02x}", b)).collect()
}

/// Salted, deterministic, length-preserving replacement for one hex sub-range.
fn pseudonymize_hex(part: &str, semantic_type: i64, salt: &str) -> String {
    let want = part.len();
    let mut out: String = if STRING_FIELD_TYPES.contains(&semantic_type) {
        let digest = shake256_hex(part, salt, want.div_ceil(4));
        digest.bytes().map(|b| format!("{:02x}", b)).collect()
    } else {
        shake256_hex(part, salt, want.div_ceil(2))
    };
    while out.len() < want {
        out.push('0');
    }
    out.truncate(want);
    out
}

// ─── Frame rewriter ───────────────────────────────────────────────────────────
//
// Fields arrive sorted outermost-first, so a broad field (e.g. the full IP
// header) is written before the narrower fields it encloses.  Every nibble a
// rule finalizes is flagged 'f' in a per-packet protection mask; `combine`
// then forces any later write that touches a flagged byte back to the current
// frame value, so an alias field carrying the original bytes under another
// name cannot silently restore an already-anonymized region.

/// Merge `updated` over `original`, keeping `original`'s byte wherever the
/// mask reads "ff". No mask means no protection: `updated` passes through.
fn combine(original: &str, updated: &str, mask: Option<&str>) -> String {
    let Some(mask) = mask else {
        return updated.to_string();
    };
    let mut out = updated.as_bytes().to_vec();
    let n = original.len().min(updated.len()).min(mask.len());
    let mut i = 0;
    while i + 2 <= n {
        if mask[i..i + 2].eq_ignore_ascii_case("ff") {
            out[i..i + 2].copy_from_slice(&original.as_bytes()[i..i + 2]);
        }
        i += 2;
    }
    String::from_utf8(out).unwrap_or_else(|_| updated.to_string())
}

/// Splice `value_hex` into `frame` at nibble position `byte_off * 2`, using
/// the value's own length (not the declared one) as the substitution width,
/// truncated so the frame length never changes. Non-zero bitmask flags mark
/// sub-byte field variants the rewriter does not support; they pass through.
fn rewrite_frame(
    frame: &str,
    value_hex: &str,
    byte_off: i64,
    byte_len: i64,
    bitmask: i64,
    mmask: Option<&str>,
) -> String {
    if byte_off < 0 || byte_len <= 0 || value_hex.is_empty() || bitmask != 0 {
        return frame.to_string();
    }
    let p = match (byte_off as usize).checked_mul(2) {
        Some(p) if p < frame.len() => p,
        _ => return frame.to_string(),
    };
    let w = value_hex.len().min(frame.len() - p);
    let updated = format!("{}{}{}", &frame[..p], &value_hex[..w], &frame[p + w..]);
    combine(frame, &updated, mmask)
}

// ─── Field flattener ──────────────────────────────────────────────────────────

const RAW_SUFFIX: &str = "_raw";

/// One addressable span of the original frame, as reported by the dissector:
/// hex value, byte offset, declared byte length, bitmask flag, ftype code.
#[derive(Debug, Clone)]
struct RawField {
    key: String,
    name: String,
    hex: String,
    byte_off: i64,
    byte_len: i64,
    bitmask: i64,
    semantic_type: i64,
}

/// Strip any embedded comparison-operator decoration ("x == y", "x eq y")
/// and qualify dot-free short names with the nearest enclosing key.
fn canonical_name(key: &str, parent: &str) -> String {
    let mut name = key.to_string();
    for op in [" == ", " eq "] {
        if let Some(idx) = name.find(op) {
            name = format!("{}{}", &name[..idx], RAW_SUFFIX);
        }
    }
    if !parent.is_empty() && !name.contains('.') && !name.starts_with(parent) {
        name = format!("{}.{}", parent, name);
    }
    name
}

fn parse_raw_tuple(key: &str, name: &str, tuple: &[Value]) -> Option<RawField> {
    if tuple.len() < 3 || !tuple[1].is_number() {
        return None;
    }
    let hex = tuple[0].as_str()?;
    if !hex.is_ascii() {
        return None;
    }
    Some(RawField {
        key: key.to_string(),
        name: name.to_string(),
        hex: hex.to_string(),
        byte_off: json_i64(&tuple[1]),
        byte_len: json_i64(&tuple[2]),
        bitmask: tuple.get(3).map(json_i64).unwrap_or(0),
        semantic_type: tuple.get(4).map(json_i64).unwrap_or(0),
    })
}

enum WorkItem<'a> {
    Node(&'a Value, String),
    Raw(&'a str, &'a Value, String),
}

/// Depth-first walk of a dissected packet's layer tree, yielding every raw
/// field in document order. Work-list based: nesting depth is the dissector's
/// business and must not become our stack depth.
fn flatten_raw_fields(layers: &Value) -> Vec<RawField> {
    let mut out = Vec::new();
    let mut work = vec![WorkItem::Node(layers, String::new())];
    while let Some(item) = work.pop() {
        match item {
            WorkItem::Node(Value::Object(map), parent) => {
                // pushed in reverse so the stack pops in document order
                for (k, v) in map.iter().rev() {
                    if k.ends_with(RAW_SUFFIX) {
                        work.push(WorkItem::Raw(k, v, parent.clone()));
                    } else if v.is_object() || v.is_array() {
                        work.push(WorkItem::Node(v, k.clone()));
                    }
                }
            }
            WorkItem::Node(Value::Array(items), parent) => {
                for v in items.iter().rev() {
                    if v.is_object() || v.is_array() {
                        work.push(WorkItem::Node(v, parent.clone()));
                    }
                }
            }
            WorkItem::Node(..) => {}
            WorkItem::Raw(key, value, parent) => {
                let name = canonical_name(key, &parent);
                let Value::Array(entries) = value else { continue };
                if entries.first().map_or(false, Value::is_array) {
                    // repeated occurrences of one field, each individually addressable
                    for entry in entries {
                        if let Value::Array(tuple) = entry {
                            if let Some(f) = parse_raw_tuple(key, &name, tuple) {
                                out.push(f);
                            }
                        }
                    }
                } else if let Some(f) = parse_raw_tuple(key, &name, entries) {
                    out.push(f);
                }
            }
        }
    }
    out
}

/// The synthetic whole-frame raw entry seeding the frame buffer. May be a
/// single tuple or a segmented list of tuples whose hex values concatenate.
fn whole_frame_hex(layers: &Value) -> Option<String> {
    let entries = layers.get("frame_raw")?.as_array()?;
    let first = entries.first()?;
    let hex: String = if first.is_array() {
        entries.iter().filter_map(|t| t.as_array()?.first()?.as_str()).collect()
    } else {
        first.as_str()?.to_string()
    };
    if hex.is_empty() || !hex.is_ascii() {
        return None;
    }
    Some(hex)
}

fn frame_epoch(layers: &Value) -> Option<f64> {
    match layers.get("frame")?.get("frame.time_epoch")? {
        Value::String(s) => s.trim().parse().ok(),
        Value::Number(n) => n.as_f64(),
        _ => None,
    }
}

// ─── Packet pipeline ──────────────────────────────────────────────────────────

/// Ascending byte offset, ties broken longest-first, so an enclosing field is
/// always written before the fields nested inside it.
fn sort_candidates(fields: &mut [RawField]) {
    fields.sort_by(|a, b| a.byte_off.cmp(&b.byte_off).then(b.byte_len.cmp(&a.byte_len)));
}

/// Run the full per-packet pipeline: flatten, sort, transform, rewrite.
/// Returns the final frame hex plus the packet's epoch timestamp, or None
/// when the packet carries no whole-frame raw value (recoverable: skip it).
fn process_packet(packet: &Value, rules: &RuleSet, stats: &mut RunStats) -> Option<(String, Option<f64>)> {
    let layers = packet.get("_source").and_then(|s| s.get("layers"))?;
    let mut frame = whole_frame_hex(layers)?;
    let original = frame.clone();
    let mut mmask = "0".repeat(frame.len());
    let ts = frame_epoch(layers);

    let mut fields: Vec<RawField> = flatten_raw_fields(layers)
        .into_iter()
        .filter(|f| f.key != "frame_raw")
        .collect();
    sort_candidates(&mut fields);
    debug!("frame of {} bytes, {} candidate fields", frame.len() / 2, fields.len());

    for field in &fields {
        stats.fields_inspected += 1;
        let rule = rules.rules.get(&field.name);
        let (value, pattern) = match rule {
            Some(r) => {
                match r.kind {
                    RuleKind::Mask => stats.fields_masked += 1,
                    RuleKind::Pseudonymize => stats.fields_pseudonymized += 1,
                }
                r.apply(&field.hex, field.semantic_type, &rules.salt)
            }
            // a visited, untargeted field is still fully resolved: its bytes
            // hold the as-dissected value and must not be perturbed later
            None => (field.hex.clone(), "f".repeat(field.hex.len())),
        };
        let rewritten =
            rewrite_frame(&frame, &value, field.byte_off, field.byte_len, field.bitmask, Some(&mmask));
        let changed = rewritten != frame;
        frame = rewritten;
        // updating the mask unconditionally would flag untouched, unmatched
        // regions as protected
        if rule.is_some() || changed {
            mmask = rewrite_frame(&mmask, &pattern, field.byte_off, field.byte_len, field.bitmask, None);
        }
    }

    if frame != original {
        stats.frames_modified += 1;
    }
    Some((frame, ts))
}

fn split_timestamp(ts: Option<f64>) -> (u32, u32) {
    match ts {
        Some(t) if t.is_finite() => {
            let sec = t.floor();
            (sec as u32, ((t - sec) * 1_000_000.0) as u32)
        }
        _ => {
            let now = SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default();
            (now.as_secs() as u32, now.subsec_micros())
        }
    }
}

/// Entry operation: anonymize a list of dissected packets into a finished
/// legacy-pcap byte buffer. Output record order equals input packet order;
/// packets lacking frame data are skipped, everything else is emitted.
fn anonymize(
    packets: &[Value],
    rules: &RuleSet,
    source: Option<&[PcapRecord]>,
    stats: &mut RunStats,
) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    write_global_header(&mut out)?;
    for (i, packet) in packets.iter().enumerate() {
        stats.total_packets += 1;
        let Some((frame, ts)) = process_packet(packet, rules, stats) else {
            warn!("packet {} has no frame_raw data, skipping", i + 1);
            stats.packets_skipped += 1;
            continue;
        };
        let ts = ts.or_else(|| {
            source
                .and_then(|recs| recs.get(i))
                .map(|r| r.ts_sec as f64 + r.ts_usec as f64 / 1_000_000.0)
        });
        let (sec, usec) = split_timestamp(ts);
        write_record(&mut out, sec, usec, &hex_to_bytes(&frame))?;
        stats.packets_emitted += 1;
    }
    Ok(out)
}

// ─── pcap container codec ─────────────────────────────────────────────────────

const MAGIC_USEC_NATIVE: u32 = 0xa1b2c3d4;
const MAGIC_USEC_SWAPPED: u32 = 0xd4c3b2a1;
const MAGIC_NSEC_NATIVE: u32 = 0xa1b23c4d;
const MAGIC_NSEC_SWAPPED: u32 = 0x4d3cb2a1;

#[derive(Debug)]
struct PcapHeader {
    big_endian: bool,
    version_major: u16,
    version_minor: u16,
    snaplen: u32,
    linktype: u32,
}

#[derive(Debug, Clone)]
struct PcapRecord {
    ts_sec: u32,
    ts_usec: u32,
    orig_len: u32,
    data: Vec<u8>,
}

/// Parse a legacy pcap buffer. The four recognized magic values select byte
/// order only; the nanosecond family's ts_usec is carried through as-is.
/// Truncated trailing data is silently dropped; an unknown magic is fatal.
fn parse_pcap(buf: &[u8]) -> Result<(PcapHeader, Vec<PcapRecord>)> {
    if buf.len() < 24 {
        bail!("capture too short for a pcap global header ({} bytes)", buf.len());
    }
    let magic = u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]);
    let big_endian = match magic {
        MAGIC_USEC_NATIVE | MAGIC_NSEC_NATIVE => false,
        MAGIC_USEC_SWAPPED | MAGIC_NSEC_SWAPPED => true,
        other => bail!("unknown pcap magic number 0x{:08x}", other),
    };
    let u16_at = |off: usize| {
        let b = [buf[off], buf[off + 1]];
        if big_endian { u16::from_be_bytes(b) } else { u16::from_le_bytes(b) }
    };
    let u32_at = |off: usize| {
        let b = [buf[off], buf[off + 1], buf[off + 2], buf[off + 3]];
        if big_endian { u32::from_be_bytes(b) } else { u32::from_le_bytes(b) }
    };
    let header = PcapHeader {
        big_endian,
        version_major: u16_at(4),
        version_minor: u16_at(6),
        snaplen: u32_at(16),
        linktype: u32_at(20),
    };

    let mut records = Vec::new();
    let mut off = 24usize;
    while off + 16 <= buf.len() {
        let ts_sec = u32_at(off);
        let ts_usec = u32_at(off + 4);
        let incl_len = u32_at(off + 8) as usize;
        let orig_len = u32_at(off + 12);
        off += 16;
        if off + incl_len > buf.len() {
            break;
        }
        records.push(PcapRecord {
            ts_sec,
            ts_usec,
            orig_len,
            data: buf[off..off + incl_len].to_vec(),
        });
        off += incl_len;
    }
    Ok((header, records))
}

/// Output is always standard little-endian v2.4, snaplen 65535, Ethernet,
/// regardless of what the source container declared.
fn write_global_header(w: &mut impl Write) -> Result<()> {
    w.write_all(&MAGIC_USEC_NATIVE.to_le_bytes())?;
    w.write_all(&2u16.to_le_bytes())?;
    w.write_all(&4u16.to_le_bytes())?;
    w.write_all(&0i32.to_le_bytes())?; // thiszone
    w.write_all(&0u32.to_le_bytes())?; // sigfigs
    w.write_all(&65535u32.to_le_bytes())?; // snaplen
    w.write_all(&1u32.to_le_bytes())?; // linktype: Ethernet
    Ok(())
}

fn write_record(w: &mut impl Write, ts_sec: u32, ts_usec: u32, data: &[u8]) -> Result<()> {
    let len = data.len() as u32;
    w.write_all(&ts_sec.to_le_bytes())?;
    w.write_all(&ts_usec.to_le_bytes())?;
    w.write_all(&len.to_le_bytes())?;
    w.write_all(&len.to_le_bytes())?; // orig_len: no truncation tracking
    w.write_all(data)?;
    Ok(())
}

// ─── Main ─────────────────────────────────────────────────────────────────────

fn main() -> Result<()> {
    let args = Args::parse();
    let log_level = if args.verbose { tracing::Level::DEBUG } else { tracing::Level::INFO };
    tracing_subscriber::fmt().with_max_level(log_level).with_target(false).with_writer(std::io::stderr).init();

    let mut file_cfg = FileConfig::default();
    if let Some(ref path) = args.config {
        let text = fs::read_to_string(path).with_context(|| format!("Cannot read {:?}", path))?;
        file_cfg = serde_json::from_str(&text).with_context(|| format!("Invalid rule file {:?}", path))?;
    }
    let mut mask = file_cfg.mask;
    mask.extend(args.mask.iter().cloned());
    let mut pseudonymize = file_cfg.pseudonymize;
    pseudonymize.extend(args.pseudonymize.iter().cloned());
    if mask.is_empty() && pseudonymize.is_empty() {
        warn!("no mask or pseudonymize rules configured; frames will be re-emitted unchanged");
    }
    let salt_given = args.salt.is_some() || file_cfg.salt.is_some();
    let rules = RuleSet::new(&mask, &pseudonymize, args.salt.clone().or(file_cfg.salt))?;
    if !salt_given {
        info!("generated salt {} (pass --salt to reproduce this output)", rules.salt);
    }

    info!("Opening {:?}", args.input);
    let file = File::open(&args.input).with_context(|| format!("Cannot open {:?}", args.input))?;
    let dissected: Value = serde_json::from_reader(BufReader::new(file))
        .with_context(|| format!("Invalid dissection JSON {:?}", args.input))?;
    let packets = match dissected {
        Value::Array(pkts) => pkts,
        _ => bail!("expected a JSON array of dissected packets in {:?}", args.input),
    };

    let source_records = match args.source_pcap {
        Some(ref path) => {
            let raw = fs::read(path).with_context(|| format!("Cannot open {:?}", path))?;
            let (header, records) = parse_pcap(&raw)
                .with_context(|| format!("Not a valid legacy pcap file {:?}", path))?;
            info!(
                "source capture: v{}.{} {} snaplen={} linktype={} records={}",
                header.version_major,
                header.version_minor,
                if header.big_endian { "big-endian" } else { "little-endian" },
                header.snaplen,
                header.linktype,
                records.len()
            );
            if records.len() != packets.len() {
                warn!(
                    "source capture has {} records but dissection has {} packets",
                    records.len(),
                    packets.len()
                );
            }
            Some(records)
        }
        None => None,
    };

    let mut stats = RunStats::default();
    let bytes = anonymize(&packets, &rules, source_records.as_deref(), &mut stats)?;
    fs::write(&args.output, &bytes).with_context(|| format!("Cannot create {:?}", args.output))?;
    info!("wrote {} bytes to {:?}", bytes.len(), args.output);

    if args.report {
        println!("{}", serde_json::to_string_pretty(&stats)?);
    } else {
        println!("=== Anonymization Summary ===");
        println!("Total packets:           {}", stats.total_packets);
        println!("Packets emitted:         {}", stats.packets_emitted);
        println!("Packets skipped:         {}", stats.packets_skipped);
        println!("Frames modified:         {}", stats.frames_modified);
        println!("Fields inspected:        {}", stats.fields_inspected);
        println!("Fields masked:           {}", stats.fields_masked);
        println!("Fields pseudonymized:    {}", stats.fields_pseudonymized);
    }
    Ok(())
}

// ─── Tests ────────────────────────────────────────────────────────────────────
