use svault_crypto::{generate_file_key, Cascade, CipherSuite, EncryptionMethod};

fn make_data(size: usize) -> Vec<u8> {
    (0..size)
        .map(|i| (i.wrapping_mul(7) ^ (i >> 3)) as u8)
        .collect()
}

#[divan::bench(args = [1024, 65536, 1048576])]
fn bench_cascade_encrypt(bencher: divan::Bencher, size: usize) {
    let file_key = generate_file_key();
    let cascade = Cascade::standard();
    let data = make_data(size);
    bencher
        .counter(divan::counter::BytesCount::new(size))
        .bench(|| {
            cascade
                .encrypt(divan::black_box(&data), divan::black_box(file_key.as_bytes()))
                .unwrap()
        });
}

#[divan::bench(args = [1024, 65536, 1048576])]
fn bench_cascade_decrypt(bencher: divan::Bencher, size: usize) {
    let file_key = generate_file_key();
    let cascade = Cascade::standard();
    let data = make_data(size);
    let blob = cascade.encrypt(&data, file_key.as_bytes()).unwrap();
    bencher
        .counter(divan::counter::BytesCount::new(size))
        .bench(|| {
            cascade
                .decrypt(divan::black_box(&blob), divan::black_box(file_key.as_bytes()))
                .unwrap()
        });
}

#[divan::bench]
fn bench_single_strong_block(bencher: divan::Bencher) {
    let file_key = generate_file_key();
    let cascade = Cascade::new(EncryptionMethod::Single(CipherSuite::StrongBlock));
    let data = make_data(65536);
    bencher.bench(|| {
        cascade
            .encrypt(divan::black_box(&data), divan::black_box(file_key.as_bytes()))
            .unwrap()
    });
}

fn main() {
    divan::main();
}
