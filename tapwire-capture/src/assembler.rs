//! Per-connection TCP reassembly.
//!
//! The assembler is single-threaded: segments of every connection pass
//! through one instance in capture order. For each connection it restores
//! sequence order per direction, drops retransmitted bytes, and tells a
//! [`ConnectionHandler`] about opens, ordered payload and closes.
//!
//! Connections are oriented by their first observed segment, except that a
//! leading SYN-ACK means the server was seen first and the flow is flipped.

use std::collections::HashMap;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use tapwire_config::{AssemblyConfig, OptionCheck};
use tapwire_core::FlowId;
use tracing::{debug, trace};

use crate::packet::TcpSegment;

/// Largest window-scale shift allowed by RFC 7323.
const MAX_WINDOW_SCALE: u8 = 14;

/// Payload direction relative to the connection's [`FlowId`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    /// From `flow.src` to `flow.dst`.
    Forward,
    /// From `flow.dst` to `flow.src`.
    Reverse,
}

impl Direction {
    fn index(self) -> usize {
        match self {
            Direction::Forward => 0,
            Direction::Reverse => 1,
        }
    }

    pub fn opposite(self) -> Self {
        match self {
            Direction::Forward => Direction::Reverse,
            Direction::Reverse => Direction::Forward,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// Both sides sent FIN.
    Fin,
    Reset,
    /// No segment within the idle timeout.
    Idle,
    /// The capture is stopping.
    Shutdown,
}

impl CloseReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            CloseReason::Fin => "fin",
            CloseReason::Reset => "reset",
            CloseReason::Idle => "idle",
            CloseReason::Shutdown => "shutdown",
        }
    }
}

/// Receiver of reassembled connection events.
///
/// Called synchronously from the capture thread; implementations must not
/// block on consumers.
pub trait ConnectionHandler {
    fn on_open(&mut self, flow: FlowId, handshake_seen: bool);

    /// Ordered, non-overlapping payload for one direction.
    fn on_data(&mut self, flow: &FlowId, direction: Direction, data: Bytes, observed_at: DateTime<Utc>);

    fn on_close(&mut self, flow: &FlowId, reason: CloseReason);
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AssemblerStats {
    pub segments: u64,
    pub connections: u64,
    pub delivered_bytes: u64,
    pub retransmissions: u64,
    pub gaps_skipped: u64,
    pub rejected: u64,
}

/// `a < b` in sequence space.
#[inline]
fn seq_lt(a: u32, b: u32) -> bool {
    (a.wrapping_sub(b) as i32) < 0
}

#[derive(Debug)]
struct Pending {
    seq: u32,
    data: Bytes,
    observed_at: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct HalfConnection {
    next_seq: Option<u32>,
    pending: Vec<Pending>,
    buffered: usize,
    fin: bool,
    window_scale: u8,
    /// Last acknowledgement and scaled window this side advertised.
    advertised: Option<(u32, u32)>,
}

#[derive(Debug)]
struct Connection {
    flow: FlowId,
    halves: [HalfConnection; 2],
    last_seen: DateTime<Utc>,
}

pub struct Assembler {
    connections: HashMap<FlowId, Connection>,
    option_check: OptionCheck,
    max_buffered: usize,
    clock: Option<DateTime<Utc>>,
    stats: AssemblerStats,
}

impl Assembler {
    pub fn new(config: &AssemblyConfig) -> Self {
        Self {
            connections: HashMap::new(),
            option_check: config.option_check,
            max_buffered: config.max_buffered_bytes,
            clock: None,
            stats: AssemblerStats::default(),
        }
    }

    pub fn stats(&self) -> AssemblerStats {
        self.stats
    }

    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    /// Latest capture timestamp seen.
    pub fn clock(&self) -> Option<DateTime<Utc>> {
        self.clock
    }

    pub fn process<H: ConnectionHandler>(&mut self, segment: TcpSegment, handler: &mut H) {
        self.stats.segments += 1;
        self.clock = Some(match self.clock {
            Some(clock) if clock > segment.observed_at => clock,
            _ => segment.observed_at,
        });

        let key = FlowId::new(segment.src, segment.dst);
        let (key, direction) = if self.connections.contains_key(&key) {
            (key, Direction::Forward)
        } else if self.connections.contains_key(&key.reverse()) {
            (key.reverse(), Direction::Reverse)
        } else {
            // Bare ACKs, FINs and RSTs of unknown connections carry nothing to parse.
            if !segment.flags.syn && segment.payload.is_empty() {
                return;
            }
            let (flow, direction) = if segment.flags.syn && segment.flags.ack {
                (key.reverse(), Direction::Reverse)
            } else {
                (key, Direction::Forward)
            };
            self.connections.insert(
                flow,
                Connection {
                    flow,
                    halves: Default::default(),
                    last_seen: segment.observed_at,
                },
            );
            self.stats.connections += 1;
            debug!(%flow, handshake = segment.flags.syn, "connection opened");
            handler.on_open(flow, segment.flags.syn);
            (flow, direction)
        };

        let Some(conn) = self.connections.get_mut(&key) else {
            return;
        };
        conn.last_seen = segment.observed_at;

        if !accept_segment(conn, direction, &segment, self.option_check) {
            self.stats.rejected += 1;
            trace!(flow = %conn.flow, seq = segment.seq, "segment rejected by option check");
            return;
        }

        let half = &mut conn.halves[direction.index()];
        if segment.flags.syn {
            half.next_seq = Some(segment.seq.wrapping_add(1));
            half.window_scale = segment.window_scale.unwrap_or(0);
        }
        if segment.flags.ack {
            let window = u32::from(segment.window) << half.window_scale.min(MAX_WINDOW_SCALE);
            half.advertised = Some((segment.ack, window));
        }
        let seq = if segment.flags.syn {
            segment.seq.wrapping_add(1)
        } else {
            segment.seq
        };

        if !segment.payload.is_empty() {
            let flow = conn.flow;
            let half = &mut conn.halves[direction.index()];
            let next = *half.next_seq.get_or_insert(seq);
            let offset = seq.wrapping_sub(next) as i32;
            let end = seq.wrapping_add(segment.payload.len() as u32);

            if offset < 0 {
                self.stats.retransmissions += 1;
                if seq_lt(next, end) {
                    let data = segment.payload.slice((-offset) as usize..);
                    deliver(half, &flow, direction, data, segment.observed_at, handler, &mut self.stats);
                }
            } else if offset == 0 {
                deliver(half, &flow, direction, segment.payload, segment.observed_at, handler, &mut self.stats);
            } else {
                half.buffered += segment.payload.len();
                half.pending.push(Pending {
                    seq,
                    data: segment.payload,
                    observed_at: segment.observed_at,
                });
                if half.buffered > self.max_buffered {
                    debug!(%flow, ?direction, buffered = half.buffered, "skipping sequence gap");
                    skip_gap(half, &flow, direction, handler, &mut self.stats);
                }
            }
        }

        let half = &mut conn.halves[direction.index()];
        if segment.flags.fin {
            half.fin = true;
        }

        if segment.flags.rst {
            self.close(&key, CloseReason::Reset, handler);
        } else if conn.halves.iter().all(|h| h.fin) {
            self.close(&key, CloseReason::Fin, handler);
        }
    }

    /// Closes every connection idle since before `cutoff`.
    pub fn flush_older_than<H: ConnectionHandler>(
        &mut self,
        cutoff: DateTime<Utc>,
        handler: &mut H,
    ) -> usize {
        let stale: Vec<FlowId> = self
            .connections
            .values()
            .filter(|c| c.last_seen < cutoff)
            .map(|c| c.flow)
            .collect();
        for flow in &stale {
            self.close(flow, CloseReason::Idle, handler);
        }
        stale.len()
    }

    pub fn flush_all<H: ConnectionHandler>(&mut self, handler: &mut H) {
        let flows: Vec<FlowId> = self.connections.keys().copied().collect();
        for flow in &flows {
            self.close(flow, CloseReason::Shutdown, handler);
        }
    }

    fn close<H: ConnectionHandler>(&mut self, flow: &FlowId, reason: CloseReason, handler: &mut H) {
        let Some(mut conn) = self.connections.remove(flow) else {
            return;
        };
        for direction in [Direction::Forward, Direction::Reverse] {
            let half = &mut conn.halves[direction.index()];
            while !half.pending.is_empty() {
                skip_gap(half, flow, direction, handler, &mut self.stats);
            }
        }
        debug!(%flow, reason = reason.as_str(), "connection closed");
        handler.on_close(flow, reason);
    }
}

/// Window sanity check against what the receiving side last advertised.
fn accept_segment(conn: &Connection, direction: Direction, segment: &TcpSegment, check: OptionCheck) -> bool {
    if check == OptionCheck::Lenient {
        return true;
    }
    if segment.window_scale.is_some_and(|shift| shift > MAX_WINDOW_SCALE) {
        return false;
    }
    if segment.payload.is_empty() {
        return true;
    }
    match conn.halves[direction.opposite().index()].advertised {
        Some((ack, window)) => {
            let end = segment.seq.wrapping_add(segment.payload.len() as u32);
            let limit = ack.wrapping_add(window);
            !seq_lt(limit, end)
        }
        None => true,
    }
}

/// Hands `data` on, then drains every buffered segment that became contiguous.
fn deliver<H: ConnectionHandler>(
    half: &mut HalfConnection,
    flow: &FlowId,
    direction: Direction,
    data: Bytes,
    observed_at: DateTime<Utc>,
    handler: &mut H,
    stats: &mut AssemblerStats,
) {
    let mut next = half.next_seq.unwrap_or_default();
    let mut chunk = Some((data, observed_at));

    while let Some((data, observed_at)) = chunk.take() {
        next = next.wrapping_add(data.len() as u32);
        stats.delivered_bytes += data.len() as u64;
        handler.on_data(flow, direction, data, observed_at);

        // Drop buffered segments now entirely behind `next`, trimming overlaps.
        let mut i = 0;
        while i < half.pending.len() {
            let p = &half.pending[i];
            let end = p.seq.wrapping_add(p.data.len() as u32);
            if !seq_lt(next, end) {
                half.buffered -= p.data.len();
                half.pending.swap_remove(i);
                continue;
            }
            if !seq_lt(next, p.seq) {
                let p = half.pending.swap_remove(i);
                half.buffered -= p.data.len();
                let skip = next.wrapping_sub(p.seq) as usize;
                chunk = Some((p.data.slice(skip..), p.observed_at));
                break;
            }
            i += 1;
        }
    }
    half.next_seq = Some(next);
}

/// Jumps to the earliest buffered segment, abandoning the missing bytes.
fn skip_gap<H: ConnectionHandler>(
    half: &mut HalfConnection,
    flow: &FlowId,
    direction: Direction,
    handler: &mut H,
    stats: &mut AssemblerStats,
) {
    let next = half.next_seq.unwrap_or_default();
    let Some(first) = half
        .pending
        .iter()
        .enumerate()
        .min_by_key(|(_, p)| p.seq.wrapping_sub(next))
        .map(|(i, _)| i)
    else {
        return;
    };
    let p = half.pending.swap_remove(first);
    half.buffered -= p.data.len();
    stats.gaps_skipped += 1;
    half.next_seq = Some(p.seq);
    deliver(half, flow, direction, p.data, p.observed_at, handler, stats);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::TcpFlags;
    use proptest::prelude::*;
    use std::net::SocketAddr;
    use tracing_test::traced_test;

    #[derive(Default)]
    struct Recorder {
        opened: Vec<(FlowId, bool)>,
        data: Vec<(Direction, Vec<u8>)>,
        closed: Vec<(FlowId, CloseReason)>,
    }

    impl Recorder {
        fn stream(&self, direction: Direction) -> Vec<u8> {
            self.data
                .iter()
                .filter(|(d, _)| *d == direction)
                .flat_map(|(_, bytes)| bytes.clone())
                .collect()
        }
    }

    impl ConnectionHandler for Recorder {
        fn on_open(&mut self, flow: FlowId, handshake_seen: bool) {
            self.opened.push((flow, handshake_seen));
        }

        fn on_data(&mut self, _: &FlowId, direction: Direction, data: Bytes, _: DateTime<Utc>) {
            self.data.push((direction, data.to_vec()));
        }

        fn on_close(&mut self, flow: &FlowId, reason: CloseReason) {
            self.closed.push((*flow, reason));
        }
    }

    const CLIENT: &str = "10.0.0.2:51000";
    const SERVER: &str = "10.0.0.9:80";

    fn seg(src: &str, dst: &str, seq: u32, flags: TcpFlags, payload: &'static [u8]) -> TcpSegment {
        TcpSegment {
            src: src.parse::<SocketAddr>().unwrap(),
            dst: dst.parse::<SocketAddr>().unwrap(),
            seq,
            ack: 0,
            flags,
            window: 65535,
            window_scale: None,
            payload: Bytes::from_static(payload),
            observed_at: Utc::now(),
        }
    }

    fn data() -> TcpFlags {
        TcpFlags::default()
    }

    fn assembler() -> Assembler {
        Assembler::new(&AssemblyConfig::default())
    }

    #[test]
    fn reorders_and_trims_retransmissions() {
        let mut asm = assembler();
        let mut rec = Recorder::default();
        let syn = TcpFlags { syn: true, ..data() };

        asm.process(seg(CLIENT, SERVER, 99, syn, b""), &mut rec);
        asm.process(seg(CLIENT, SERVER, 106, data(), b"world"), &mut rec);
        asm.process(seg(CLIENT, SERVER, 100, data(), b"hello "), &mut rec);
        asm.process(seg(CLIENT, SERVER, 103, data(), b"lo wor"), &mut rec);
        asm.process(seg(CLIENT, SERVER, 111, data(), b"!"), &mut rec);

        assert_eq!(rec.opened.len(), 1);
        assert!(rec.opened[0].1);
        assert_eq!(rec.stream(Direction::Forward), b"hello world!");
        assert_eq!(asm.stats().retransmissions, 1);
    }

    #[test]
    fn syn_ack_first_flips_orientation() {
        let mut asm = assembler();
        let mut rec = Recorder::default();
        let syn_ack = TcpFlags { syn: true, ack: true, ..data() };

        asm.process(seg(SERVER, CLIENT, 500, syn_ack, b""), &mut rec);
        asm.process(seg(CLIENT, SERVER, 1, data(), b"GET"), &mut rec);
        asm.process(seg(SERVER, CLIENT, 501, data(), b"HTTP"), &mut rec);

        let flow = rec.opened[0].0;
        assert_eq!(flow.src(), CLIENT.parse::<SocketAddr>().unwrap());
        assert_eq!(rec.stream(Direction::Forward), b"GET");
        assert_eq!(rec.stream(Direction::Reverse), b"HTTP");
    }

    #[test]
    fn mid_stream_connections_start_at_first_payload() {
        let mut asm = assembler();
        let mut rec = Recorder::default();

        asm.process(seg(CLIENT, SERVER, 7000, data(), b"abc"), &mut rec);
        asm.process(seg(CLIENT, SERVER, 7003, data(), b"def"), &mut rec);

        assert_eq!(rec.opened, vec![(FlowId::new(CLIENT.parse().unwrap(), SERVER.parse().unwrap()), false)]);
        assert_eq!(rec.stream(Direction::Forward), b"abcdef");
    }

    #[test]
    fn fin_on_both_sides_closes_and_flushes() {
        let mut asm = assembler();
        let mut rec = Recorder::default();
        let fin = TcpFlags { fin: true, ..data() };

        asm.process(seg(CLIENT, SERVER, 1, data(), b"a"), &mut rec);
        // gap at seq 2
        asm.process(seg(CLIENT, SERVER, 3, fin, b"c"), &mut rec);
        asm.process(seg(SERVER, CLIENT, 10, fin, b""), &mut rec);

        assert_eq!(rec.closed.len(), 1);
        assert_eq!(rec.closed[0].1, CloseReason::Fin);
        assert_eq!(rec.stream(Direction::Forward), b"ac");
        assert_eq!(asm.connection_count(), 0);
    }

    #[test]
    fn reset_closes_immediately() {
        let mut asm = assembler();
        let mut rec = Recorder::default();
        let rst = TcpFlags { rst: true, ..data() };

        asm.process(seg(CLIENT, SERVER, 1, data(), b"x"), &mut rec);
        asm.process(seg(SERVER, CLIENT, 1, rst, b""), &mut rec);
        assert_eq!(rec.closed[0].1, CloseReason::Reset);

        // Stray packets of a closed connection do not resurrect it.
        asm.process(seg(SERVER, CLIENT, 1, rst, b""), &mut rec);
        assert_eq!(asm.connection_count(), 0);
        assert_eq!(rec.opened.len(), 1);
    }

    #[test]
    #[traced_test]
    fn overflowing_buffer_skips_gap() {
        let mut asm = Assembler::new(&AssemblyConfig {
            max_buffered_bytes: 4,
            ..Default::default()
        });
        let mut rec = Recorder::default();

        asm.process(seg(CLIENT, SERVER, 1, data(), b"ab"), &mut rec);
        asm.process(seg(CLIENT, SERVER, 10, data(), b"cde"), &mut rec);
        assert_eq!(rec.stream(Direction::Forward), b"ab");
        asm.process(seg(CLIENT, SERVER, 13, data(), b"fg"), &mut rec);
        assert_eq!(rec.stream(Direction::Forward), b"abcdefg");
        assert_eq!(asm.stats().gaps_skipped, 1);
        assert!(logs_contain("skipping sequence gap"));
    }

    #[test]
    fn idle_connections_are_flushed() {
        let mut asm = assembler();
        let mut rec = Recorder::default();
        let mut old = seg(CLIENT, SERVER, 1, data(), b"x");
        old.observed_at = Utc::now() - chrono::Duration::seconds(600);
        asm.process(old, &mut rec);
        asm.process(seg("10.0.0.3:40000", SERVER, 1, data(), b"y"), &mut rec);

        let cutoff = Utc::now() - chrono::Duration::seconds(60);
        assert_eq!(asm.flush_older_than(cutoff, &mut rec), 1);
        assert_eq!(rec.closed[0].1, CloseReason::Idle);

        asm.flush_all(&mut rec);
        assert_eq!(rec.closed.len(), 2);
        assert_eq!(rec.closed[1].1, CloseReason::Shutdown);
    }

    #[test]
    fn strict_check_rejects_out_of_window_payload() {
        let mut asm = Assembler::new(&AssemblyConfig {
            option_check: OptionCheck::Strict,
            ..Default::default()
        });
        let mut rec = Recorder::default();

        asm.process(seg(CLIENT, SERVER, 1, data(), b"ok"), &mut rec);
        let mut ack = seg(SERVER, CLIENT, 1, TcpFlags { ack: true, ..data() }, b"");
        ack.ack = 3;
        ack.window = 4;
        asm.process(ack, &mut rec);
        asm.process(seg(CLIENT, SERVER, 3, data(), b"1234567"), &mut rec);

        assert_eq!(rec.stream(Direction::Forward), b"ok");
        assert_eq!(asm.stats().rejected, 1);
    }

    proptest! {
        #[test]
        fn arrival_order_does_not_change_the_stream(
            order in Just((0..8usize).collect::<Vec<_>>()).prop_shuffle(),
            duplicate in 0..8usize,
        ) {
            const MESSAGE: &[u8; 24] = b"abcdefghijklmnopqrstuvwx";
            let mut asm = assembler();
            let mut rec = Recorder::default();
            asm.process(seg(CLIENT, SERVER, 41, TcpFlags { syn: true, ..data() }, b""), &mut rec);

            for i in order.iter().copied().chain(std::iter::once(duplicate)) {
                let chunk = &MESSAGE[i * 3..i * 3 + 3];
                asm.process(seg(CLIENT, SERVER, 42 + (i as u32) * 3, data(), chunk), &mut rec);
            }
            prop_assert_eq!(rec.stream(Direction::Forward), MESSAGE.to_vec());
        }
    }
}
