use criterion::{BenchmarkId, Criterion, black_box, criterion_group, criterion_main};
use libnfctag::addressing::{ByteKind, MemoryMap};
use libnfctag::ndef::WritePlan;
use libnfctag::tlv::{ScanEvent, TlvScanner};

fn tag_image(msg_len: usize) -> Vec<u8> {
    let mut image = vec![0x01, 0x03, 0xA0, 0x10, 0x44, 0x00, 0x00];
    image.push(0x03);
    if msg_len > 0xFE {
        image.extend_from_slice(&[0xFF, (msg_len >> 8) as u8, msg_len as u8]);
    } else {
        image.push(msg_len as u8);
    }
    image.extend((0..msg_len).map(|i| (i & 0xff) as u8));
    image.push(0xFE);
    image
}

fn bench_scan(c: &mut Criterion) {
    let mut group = c.benchmark_group("tlv_scan");
    for &len in &[16usize, 200usize, 1024usize] {
        let image = tag_image(len);
        group.bench_with_input(BenchmarkId::from_parameter(len), &image, |b, image| {
            b.iter(|| {
                let mut scanner = TlvScanner::new();
                for (offset, byte) in image.iter().enumerate() {
                    if let Ok(ScanEvent::Ndef(found)) = scanner.feed(offset, *byte) {
                        black_box(found);
                        break;
                    }
                }
            });
        });
    }
    group.finish();
}

fn bench_write_plan(c: &mut Criterion) {
    let mut group = c.benchmark_group("write_plan");
    let mut map = MemoryMap::new(4, 16, 2048);
    map.exclude(160..164, ByteKind::Lock);
    map.exclude(512..520, ByteKind::Reserved);
    for &len in &[32usize, 254usize, 1500usize] {
        let msg: Vec<u8> = (0..len).map(|i| (i & 0xff) as u8).collect();
        group.bench_with_input(BenchmarkId::from_parameter(len), &msg, |b, msg| {
            b.iter(|| {
                black_box(WritePlan::new(black_box(&map), 16, msg).ok());
            });
        });
    }
    group.finish();
}

criterion_group!(benches, bench_scan, bench_write_plan);
criterion_main!(benches);
