//! Write and read throughput of in-memory recordings

use std::hint::black_box;
use std::io::Cursor;

use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use pango_log::test_utils::SyntheticRecording;
use pango_log::{PacketStreamReader, PacketStreamSource, PacketStreamWriter};

fn bench_write(c: &mut Criterion) {
    let mut group = c.benchmark_group("write");
    for size in [64usize, 4096, 65536] {
        let payload = vec![0xA5u8; size];
        group.throughput(Throughput::Bytes((size * 100) as u64));
        group.bench_with_input(BenchmarkId::new("variable_packets", size), &payload, |b, payload| {
            b.iter(|| {
                let mut writer = PacketStreamWriter::from_writer(Vec::with_capacity(size * 110), true)
                    .expect("writer");
                let src = writer.add_source(PacketStreamSource::new("bench", "mem://")).expect("source");
                for i in 0..100 {
                    writer.write_source_packet(src, payload, i, None).expect("packet");
                }
                black_box(writer.into_inner().expect("close"))
            })
        });
    }
    group.finish();
}

fn bench_read(c: &mut Criterion) {
    let bytes = SyntheticRecording::new()
        .with_times((0..10_000).collect())
        .to_bytes()
        .expect("recording");

    let mut group = c.benchmark_group("read");
    group.throughput(Throughput::Elements(10_000));
    group.bench_function("sequential_frames", |b| {
        b.iter(|| {
            let reader = PacketStreamReader::from_reader(Cursor::new(bytes.clone())).expect("reader");
            let mut total = 0usize;
            while let Some(mut packet) = reader.next_frame().expect("frame") {
                total += packet.read_payload().expect("payload").len();
            }
            black_box(total)
        })
    });
    group.bench_function("open_with_footer_index", |b| {
        b.iter(|| black_box(PacketStreamReader::from_reader(Cursor::new(bytes.clone())).expect("reader")))
    });

    let reader = PacketStreamReader::from_reader(Cursor::new(bytes.clone())).expect("reader");
    group.bench_function("random_seek", |b| {
        let mut frame = 0usize;
        b.iter(|| {
            frame = (frame + 7_919) % 10_000;
            reader.seek(0, frame).expect("seek");
            black_box(reader.next_frame().expect("frame").map(|p| p.time))
        })
    });
    group.finish();
}

criterion_group!(benches, bench_write, bench_read);
criterion_main!(benches);
