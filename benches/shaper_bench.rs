use criterion::{black_box, criterion_group, criterion_main, Criterion};

use linkshaper::bypass::{BypassFilter, ETHERNET_HEADER_LEN, IPV4_HEADER_MIN_LEN};
use linkshaper::clock::ManualClock;
use linkshaper::queue::{self, PacketQueue};
use linkshaper::{LinkQueue, QueuedPacket, Schedule, Shaper, PACKET_SIZE};

use std::net::Ipv4Addr;

fn bench_classifier(c: &mut Criterion) {
    let mut group = c.benchmark_group("classifier");

    let filter = BypassFilter::new(Some(Ipv4Addr::new(10, 0, 0, 1)), None);
    let mut frame = vec![0u8; ETHERNET_HEADER_LEN + IPV4_HEADER_MIN_LEN + 1400];
    frame[ETHERNET_HEADER_LEN] = 0x45;
    frame[ETHERNET_HEADER_LEN + 12..ETHERNET_HEADER_LEN + 16]
        .copy_from_slice(&[10, 0, 0, 2]);

    group.bench_function("classify_shape", |b| {
        b.iter(|| filter.classify(black_box(&frame)));
    });

    frame[ETHERNET_HEADER_LEN + 12..ETHERNET_HEADER_LEN + 16]
        .copy_from_slice(&[10, 0, 0, 1]);
    group.bench_function("classify_bypass", |b| {
        b.iter(|| filter.classify(black_box(&frame)));
    });
}

fn bench_droptail(c: &mut Criterion) {
    let mut group = c.benchmark_group("droptail");

    group.bench_function("enqueue_dequeue", |b| {
        let clock = ManualClock::new(0);
        let mut q = queue::from_spec("droptail", "packets=1000", clock).unwrap();
        let packet = QueuedPacket::new(vec![0u8; 1400], 0);
        b.iter(|| {
            q.enqueue(black_box(packet.clone()));
            q.dequeue().unwrap();
        });
    });
}

fn bench_rationalize(c: &mut Criterion) {
    let mut group = c.benchmark_group("link_queue");

    group.bench_function("rationalize_100_opportunities", |b| {
        let slots: Vec<u64> = (1..=100).collect();
        b.iter(|| {
            let clock = ManualClock::new(0);
            let mut link = LinkQueue::new(
                Schedule::from_slots(slots.clone()),
                queue::from_spec("infinite", "", clock.clone()).unwrap(),
                BypassFilter::disabled(),
                clock.clone(),
                false,
            );
            for tag in 0..100u8 {
                link.read_packet(&vec![tag; PACKET_SIZE]).unwrap();
            }
            clock.set(100);
            link.wait_time().unwrap();
            let mut sink: Vec<Vec<u8>> = Vec::new();
            link.write_packets(&mut sink).unwrap();
            black_box(sink)
        });
    });
}

criterion_group!(benches, bench_classifier, bench_droptail, bench_rationalize);
criterion_main!(benches);
