use criterion::{black_box, criterion_group, criterion_main, Criterion};
use std::io::{Cursor, Read};

use jagfs::buffer::Buffer;
use jagfs::compression;
use jagfs::data_file::{DataFile, SECTOR_SIZE};

/// A linked chain carrying `data` for archive 0 of index 0, preceded by
/// the format's unusable sector 0.
fn sector_image(data: &[u8]) -> Vec<u8> {
    let mut image = vec![0u8; SECTOR_SIZE];
    let chunks: Vec<&[u8]> = data.chunks(512).collect();
    for (part, chunk) in chunks.iter().enumerate() {
        let next = if part == chunks.len() - 1 {
            0u32
        } else {
            (image.len() / SECTOR_SIZE) as u32 + 1
        };
        let mut sector = Vec::with_capacity(SECTOR_SIZE);
        sector.extend_from_slice(&[0, 0]); // archive id
        sector.extend_from_slice(&(part as u16).to_be_bytes());
        sector.extend_from_slice(&next.to_be_bytes()[1..]);
        sector.push(0); // index id
        sector.extend_from_slice(chunk);
        sector.resize(SECTOR_SIZE, 0);
        image.extend_from_slice(&sector);
    }
    image
}

fn bench_sector_chain(c: &mut Criterion) {
    let payload: Vec<u8> = (0..1024 * 1024u32).map(|i| (i % 251) as u8).collect();
    let mut data_file = DataFile::new(Cursor::new(sector_image(&payload))).unwrap();

    c.bench_function("sector_chain_read_1mb", |b| {
        b.iter(|| data_file.read(0, 0, 1, black_box(payload.len())).unwrap())
    });
}

fn bench_decompress(c: &mut Criterion) {
    let payload: Vec<u8> = (0..64 * 1024u32).map(|i| (i % 7) as u8).collect();
    let mut gz = Vec::new();
    flate2::read::GzEncoder::new(payload.as_slice(), flate2::Compression::default())
        .read_to_end(&mut gz)
        .unwrap();

    let mut blob = vec![2u8];
    blob.extend_from_slice(&(gz.len() as u32).to_be_bytes());
    blob.extend_from_slice(&(payload.len() as u32).to_be_bytes());
    blob.extend_from_slice(&gz);

    c.bench_function("decompress_gzip_64kb", |b| {
        b.iter(|| compression::decompress(&mut Buffer::new(black_box(blob.clone()))).unwrap())
    });
}

criterion_group!(benches, bench_sector_chain, bench_decompress);
criterion_main!(benches);
