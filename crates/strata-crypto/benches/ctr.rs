use strata_crypto::{encrypt_chunk, generate_run_key, tag_chunk, verify_chunk};

fn make_data(size: usize) -> Vec<u8> {
    (0..size)
        .map(|i| (i.wrapping_mul(7) ^ (i >> 3)) as u8)
        .collect()
}

const BASE_NONCE: [u8; 16] = [0x5Au8; 16];

#[divan::bench(args = [1024, 65536, 1048576])]
fn bench_encrypt_chunk(bencher: divan::Bencher, size: usize) {
    let key = generate_run_key();
    let data = make_data(size);
    bencher
        .counter(divan::counter::BytesCount::new(size))
        .bench(|| {
            encrypt_chunk(
                divan::black_box(&key),
                &BASE_NONCE,
                divan::black_box(3),
                divan::black_box(&data),
            )
        });
}

#[divan::bench(args = [1024, 65536, 1048576])]
fn bench_tag_and_verify(bencher: divan::Bencher, size: usize) {
    let key = generate_run_key();
    let auth = key.auth_key();
    let ct = encrypt_chunk(&key, &BASE_NONCE, 0, &make_data(size));
    bencher
        .counter(divan::counter::BytesCount::new(size))
        .bench(|| {
            let tag = tag_chunk(divan::black_box(&auth), divan::black_box(&ct)).unwrap();
            verify_chunk(&auth, &ct, &tag).unwrap()
        });
}

fn main() {
    divan::main();
}
