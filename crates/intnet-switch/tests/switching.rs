mod common;

use common::*;
use intnet_protocol::{MacAddr, OpenFlags};
use intnet_switch::{IntNet, IntNetConfig, IntNetError};
use std::net::Ipv4Addr;

#[test]
fn unicast_reaches_only_the_destination() {
    let net = switch();
    let a = up(&net, &ALICE, "lan", MAC_A);
    let b = up(&net, &ALICE, "lan", MAC_B);
    let c = up(&net, &ALICE, "lan", MAC_C);

    let frame = eth(MAC_B, MAC_A, 0x88b5, b"hello");
    send(&net, &ALICE, a, &frame);

    assert_eq!(recv_all(&net, &ALICE, b), vec![frame]);
    assert!(recv_all(&net, &ALICE, c).is_empty());
    assert!(recv_all(&net, &ALICE, a).is_empty());
}

#[test]
fn broadcast_reaches_everyone_but_the_sender() {
    let net = switch();
    let a = up(&net, &ALICE, "lan", MAC_A);
    let b = up(&net, &ALICE, "lan", MAC_B);
    let c = up(&net, &ALICE, "lan", MAC_C);

    let frame = eth(MacAddr::BROADCAST, MAC_A, 0x88b5, b"all");
    send(&net, &ALICE, a, &frame);

    assert_eq!(recv_all(&net, &ALICE, b), vec![frame.clone()]);
    assert_eq!(recv_all(&net, &ALICE, c), vec![frame]);
    assert!(recv_all(&net, &ALICE, a).is_empty());
}

#[test]
fn inactive_interfaces_get_nothing() {
    let net = switch();
    let a = up(&net, &ALICE, "lan", MAC_A);
    let b = up(&net, &ALICE, "lan", MAC_B);
    net.set_active(&ALICE, b, false).unwrap();

    send(&net, &ALICE, a, &eth(MacAddr::BROADCAST, MAC_A, 0x88b5, b"x"));
    assert!(recv_all(&net, &ALICE, b).is_empty());
}

#[test]
fn separate_networks_are_isolated() {
    let net = switch();
    let a = up(&net, &ALICE, "one", MAC_A);
    let b = up(&net, &ALICE, "two", MAC_B);
    send(&net, &ALICE, a, &eth(MacAddr::BROADCAST, MAC_A, 0x88b5, b"x"));
    assert!(recv_all(&net, &ALICE, b).is_empty());
    assert_eq!(net.network_count(), 2);
}

#[test]
fn promiscuous_interface_sees_foreign_unicast() {
    let net = switch();
    let a = up(&net, &ALICE, "lan", MAC_A);
    let b = up(&net, &ALICE, "lan", MAC_B);
    let c = up(&net, &ALICE, "lan", MAC_C);
    net.set_promiscuous_mode(&ALICE, c, true).unwrap();

    let frame = eth(MAC_B, MAC_A, 0x88b5, b"private");
    send(&net, &ALICE, a, &frame);
    assert_eq!(recv_all(&net, &ALICE, b), vec![frame.clone()]);
    assert_eq!(recv_all(&net, &ALICE, c), vec![frame]);
}

#[test]
fn promiscuous_mode_obeys_policy() {
    let net = switch();
    let a = up(&net, &ALICE, "lan", MAC_A);
    up(&net, &ALICE, "lan", MAC_B);
    let snoop = open(&net, &ALICE, "lan", OpenFlags::IF_PROMISC_DENY);
    net.set_mac_address(&ALICE, snoop, MAC_C).unwrap();
    net.set_active(&ALICE, snoop, true).unwrap();
    net.set_promiscuous_mode(&ALICE, snoop, true).unwrap();

    send(&net, &ALICE, a, &eth(MAC_B, MAC_A, 0x88b5, b"private"));
    assert!(recv_all(&net, &ALICE, snoop).is_empty());
}

#[test]
fn mac_is_learned_until_set() {
    let net = switch();
    let a = open(&net, &ALICE, "lan", OpenFlags::empty());
    net.set_active(&ALICE, a, true).unwrap();
    let b = up(&net, &ALICE, "lan", MAC_B);

    // `a` never set its MAC; its first frame teaches the switch.
    send(&net, &ALICE, a, &eth(MAC_B, MAC_A, 0x88b5, b"hi"));
    let reply = eth(MAC_A, MAC_B, 0x88b5, b"hi back");
    send(&net, &ALICE, b, &reply);
    assert_eq!(recv_all(&net, &ALICE, a), vec![reply]);
}

#[test]
fn runt_frames_are_dropped() {
    let net = switch();
    let a = up(&net, &ALICE, "lan", MAC_A);
    let b = up(&net, &ALICE, "lan", MAC_B);
    send(&net, &ALICE, a, &[0xff; 10]);
    assert!(recv_all(&net, &ALICE, b).is_empty());
}

#[test]
fn full_receive_ring_counts_losses() {
    let net = IntNet::new(IntNetConfig {
        default_recv_size: 512,
        default_send_size: 16 * 1024,
        ..IntNetConfig::default()
    });
    let a = up(&net, &ALICE, "lan", MAC_A);
    let b = up(&net, &ALICE, "lan", MAC_B);

    let frame = eth(MAC_B, MAC_A, 0x88b5, &[7u8; 100]);
    for _ in 0..10 {
        queue(&net, &ALICE, a, &frame);
    }
    net.send(&ALICE, a).unwrap();

    let got = recv_all(&net, &ALICE, b);
    assert!(!got.is_empty() && got.len() < 10);
    let stats = net.get_buffer(&ALICE, b).unwrap().stats();
    assert_eq!(stats.lost as usize, 10 - got.len());
    assert!(stats.yields_nok > 0);
}

#[test]
fn handles_belong_to_their_session() {
    let net = switch();
    let a = open(&net, &ALICE, "lan", OpenFlags::ACCESS_PUBLIC);
    assert_eq!(net.set_active(&BOB, a, true), Err(IntNetError::InvalidHandle));
    assert_eq!(net.send(&BOB, a), Err(IntNetError::InvalidHandle));
    assert_eq!(net.close(&BOB, a), Err(IntNetError::InvalidHandle));
    net.close(&ALICE, a).unwrap();
    assert_eq!(net.close(&ALICE, a), Err(IntNetError::InvalidHandle));
    assert_eq!(net.network_count(), 0);
}

#[test]
fn last_close_destroys_the_network() {
    let net = switch();
    let a = open(&net, &ALICE, "lan", OpenFlags::empty());
    let b = open(&net, &ALICE, "lan", OpenFlags::empty());
    net.close(&ALICE, a).unwrap();
    assert_eq!(net.network_count(), 1);
    net.close(&ALICE, b).unwrap();
    assert_eq!(net.network_count(), 0);
    assert_eq!(net.interface_count(), 0);
}

#[test]
fn ipv4_traffic_is_switched_by_mac_without_shared_mac() {
    let net = switch();
    let a = up(&net, &ALICE, "lan", MAC_A);
    let b = up(&net, &ALICE, "lan", MAC_B);
    let frame = ipv4(MAC_B, MAC_A, Ipv4Addr::new(10, 0, 0, 1), Ipv4Addr::new(10, 0, 0, 2));
    send(&net, &ALICE, a, &frame);
    assert_eq!(recv_all(&net, &ALICE, b), vec![frame]);
}
