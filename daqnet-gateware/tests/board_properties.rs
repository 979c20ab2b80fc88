//! End-to-end properties of composed boards, driven through the public API.

use daqnet_gateware::board::{Board, BoardVariant, Leds};
use daqnet_gateware::config::BoardConfig;
use daqnet_gateware::frame::Frame;
use daqnet_gateware::handshake::{ChannelState, RxLines, TxLines};
use test_case::test_case;

/// Variant defaults with short PHY timings and a quick lock.
fn config(variant: BoardVariant) -> BoardConfig {
    let mut config = BoardConfig::for_variant(variant);
    config.lock_delay_cycles = Some(20);
    config.phy.reset_us = 0.2;
    config.phy.link_negotiation_us = 0.3;
    config
}

fn board(config: &BoardConfig) -> Board {
    Board::build(config).unwrap()
}

#[test]
fn no_activity_before_lock() {
    let mut cfg = config(BoardVariant::Switch);
    cfg.lock_delay_cycles = Some(500);
    cfg.consumer_enabled = true;
    let mut board = board(&cfg);
    for n in 0..3 {
        board.inject(Frame::pattern(64 + n, n as u8).unwrap().into_bytes()).unwrap();
    }
    board.submit(Frame::pattern(100, 9).unwrap()).unwrap();
    board.run(1000).unwrap();

    let trace = board.trace();
    for sample in trace.samples.iter().filter(|s| s.reference_cycle < 500) {
        assert!(!sample.locked);
        assert_eq!(sample.sync_cycle, None);
        assert_eq!(sample.rx, RxLines::default());
        assert_eq!(sample.tx, TxLines::default());
        assert_eq!(sample.indicators, 0);
    }
    let first = trace.first_activity().unwrap();
    assert!(first.reference_cycle >= 500);
    assert!(first.locked);

    // Everything got through once the domain was running.
    assert_eq!(board.received().len(), 3);
    assert_eq!(board.wire_out().len(), 1);
    trace.replay().unwrap();
}

#[test]
fn never_locked_stays_quiescent() {
    let mut cfg = config(BoardVariant::Switch);
    cfg.lock_delay_cycles = None;
    let mut board = board(&cfg);
    board.inject(vec![0x55; 60]).unwrap();
    board.submit(Frame::pattern(60, 0).unwrap()).unwrap();

    assert_eq!(board.run_until_idle(2_000).unwrap(), None);
    assert!(!board.is_locked());
    assert_eq!(board.sync_cycles(), 0);
    assert!(board.trace().first_activity().is_none());
    assert!(board.received().is_empty());
    assert!(board.wire_out().is_empty());
    assert_eq!(board.mac().unwrap().wire_backlog(), 1);
}

#[test]
fn sensor_has_only_a_blinker() {
    let mut cfg = config(BoardVariant::Sensor);
    cfg.trace_limit = 16;
    let mut board = board(&cfg);
    let composed = board.composed();
    assert!(composed.mac().is_none());
    assert!(composed.stack().is_none());
    assert!(composed.bindings().is_empty());
    assert_eq!(composed.indicators().len(), 1);
    assert!(board.link().is_none());

    // 23-bit divider at four sync edges per reference cycle: the LED comes
    // on after 2^22 edges.
    board.run(20 + (1 << 20) - 1).unwrap();
    assert_eq!(board.indicators(), Leds::empty());
    board.step().unwrap();
    assert_eq!(board.indicators(), Leds::USER_LED_3);
    assert_eq!(board.sync_cycles(), 1 << 22);
}

#[test]
fn switch_passes_lengths_unchanged() {
    let cfg = config(BoardVariant::Switch);
    let mut board = board(&cfg);
    let lens = [60u16, 61, 1000, 1536];
    for (n, len) in lens.iter().enumerate() {
        board.inject(Frame::pattern(*len, n as u8).unwrap().into_bytes()).unwrap();
    }
    assert!(board.run_until_idle(50_000).unwrap().is_some());

    for sample in &board.trace().samples {
        let view = sample.consumer_view.unwrap();
        assert_eq!(view.rx_valid, sample.rx.valid);
        assert_eq!(view.rx_len, sample.rx.len);
        assert_eq!(view.tx_ready, sample.tx.ready);
    }
    let received: Vec<u16> = board.received().iter().map(Frame::len).collect();
    assert_eq!(received, lens);
}

#[test_case(60 ; "minimum frame")]
#[test_case(1 ; "single byte")]
#[test_case(1536 ; "mtu")]
fn loopback_round_trip(len: u16) {
    let mut cfg = config(BoardVariant::Switch);
    cfg.loopback = true;
    let mut board = board(&cfg);
    let frame = Frame::pattern(len, 0x42).unwrap();
    board.submit(frame.clone()).unwrap();
    assert!(board.run_until_idle(100_000).unwrap().is_some());

    assert!(board.wire_out().is_empty());
    assert_eq!(board.received(), &[frame]);

    let trace = board.trace();
    let started: Vec<u16> = trace
        .samples
        .iter()
        .filter(|s| s.tx.start)
        .map(|s| s.tx.len)
        .collect();
    let acked: Vec<u16> = trace
        .samples
        .iter()
        .filter(|s| s.rx.ack)
        .map(|s| s.rx.len)
        .collect();
    assert_eq!(started, vec![len]);
    assert_eq!(acked, vec![len]);
}

#[test_case(0 ; "immediate ack")]
#[test_case(7 ; "slow consumer")]
fn channel_returns_to_idle(consume_cycles: u32) {
    let mut cfg = config(BoardVariant::Switch);
    cfg.stack.consume_cycles = consume_cycles;
    let mut board = board(&cfg);
    for n in 0..5u8 {
        board.inject(Frame::pattern(60 + u16::from(n), n).unwrap().into_bytes()).unwrap();
    }
    let taken = board.run_until_idle(10_000).unwrap();
    assert!(taken.is_some());

    let stack = board.stack().unwrap();
    assert_eq!(stack.rx_state(), ChannelState::Idle);
    assert_eq!(stack.tx_state(), ChannelState::Idle);
    assert_eq!(board.received().len(), 5);
    assert_eq!(board.rx_stall_cycles(), 0);
}

#[test]
fn frames_keep_their_order() {
    let mut cfg = config(BoardVariant::Switch);
    cfg.stack.consume_cycles = 3;
    cfg.stack.behavior = "echo".parse().unwrap();
    let mut board = board(&cfg);
    let lens = [300u16, 64, 900, 128];
    for (n, len) in lens.iter().enumerate() {
        board.inject(Frame::pattern(*len, n as u8).unwrap().into_bytes()).unwrap();
    }
    assert!(board.run_until_idle(100_000).unwrap().is_some());

    let summary = board.trace().replay().unwrap();
    assert_eq!(summary.rx_frames, 4);
    assert_eq!(summary.tx_frames, 4);

    // Each offer begins only after the previous frame was acked.
    let mut offers = Vec::new();
    let mut outstanding = false;
    let mut prev = RxLines::default();
    for sample in board.trace().samples.iter().filter(|s| s.sync_cycle.is_some()) {
        if sample.rx.valid && !prev.valid {
            assert!(!outstanding, "offer at {} before previous ack", sample.reference_cycle);
            outstanding = true;
            offers.push(sample.rx.len);
        }
        if sample.rx.ack {
            outstanding = false;
        }
        prev = sample.rx;
    }
    assert_eq!(offers, lens);

    let echoed: Vec<u16> = board.wire_out().iter().map(Frame::len).collect();
    assert_eq!(echoed, lens);
}

#[test]
fn disabled_stack_stalls_without_violation() {
    let mut cfg = config(BoardVariant::Switch);
    cfg.consumer_enabled = false;
    let mut board = board(&cfg);
    assert!(board.composed().consumer_disabled());
    assert!(board.submit(Frame::pattern(10, 0).unwrap()).is_err());

    board.inject(vec![7u8; 90]).unwrap();
    assert_eq!(board.run_until_idle(5_000).unwrap(), None);
    assert!(board.rx_stall_cycles() > 1_000);
    assert_eq!(board.mac_stats().rx_frames, 0);

    let last = board.trace().samples.last().unwrap();
    assert!(last.consumer_view.is_none());
    assert_eq!(
        last.rx,
        RxLines {
            valid: true,
            len: 90,
            ack: false
        }
    );
    board.trace().replay().unwrap();
}

#[test]
fn proto_switch_mirrors_link_on_leds() {
    let mut board = board(&config(BoardVariant::ProtoSwitch));
    assert_eq!(board.composed().domain().name(), "sys");

    board.run(20).unwrap();
    assert_eq!(board.indicators(), Leds::empty());

    while !board.link().unwrap().link_up() {
        board.step().unwrap();
    }
    board.step().unwrap();
    assert_eq!(board.indicators(), Leds::USER_LED_1);

    board.inject(vec![3u8; 60]).unwrap();
    assert!(board.run_until_idle(1_000).unwrap().is_some());
    assert_eq!(
        board.indicators(),
        Leds::ETH_LED | Leds::USER_LED_0 | Leds::USER_LED_1
    );
    assert_eq!(board.link().unwrap().link_drops(), 0);
}

#[test]
fn trace_survives_a_file_round_trip() {
    let mut board = board(&config(BoardVariant::Switch));
    board.inject(vec![1u8; 70]).unwrap();
    board.run(200).unwrap();

    let path = std::env::temp_dir().join(format!("daqnet-board-{}.json", std::process::id()));
    board.trace().write_json(&path).unwrap();
    let loaded = daqnet_gateware::trace::Trace::load_json(&path).unwrap();
    std::fs::remove_file(&path).unwrap();
    assert_eq!(loaded.variant, BoardVariant::Switch);
    assert_eq!(loaded.samples.len(), board.trace().samples.len());
    assert_eq!(loaded.replay().unwrap().rx_frames, 1);
}
