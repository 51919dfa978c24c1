use criterion::{black_box, criterion_group, criterion_main, Criterion};
use listing_store_core::{codec, unique_where, Identifier, Record, Value};
use time::macros::datetime;

fn mk_listing(index: usize) -> Record {
    Record::new()
        .with("url", format!("https://www.wg-gesucht.de/wohnungen/{index}.html"))
        .with("rent", i64::try_from(index % 2_000).unwrap_or(0))
        .with("size_m2", 12.5 + f64::from(u32::try_from(index % 80).unwrap_or(0)))
        .with("furnished", index % 3 == 0)
        .with("posted", datetime!(2024-03-01 12:30:00))
        .with("tags", vec!["balcony", "dishwasher", "elevator"])
        .with("deposit", if index % 5 == 0 { Value::Float(f64::NAN) } else { Value::Absent })
}

fn bench_encode(c: &mut Criterion) {
    let listings: Vec<Record> = (0..256).map(mk_listing).collect();

    c.bench_function("codec_encode_256_listings", |b| {
        b.iter(|| {
            for listing in &listings {
                for (_, value) in listing {
                    let _ = black_box(codec::encode(value));
                }
            }
        });
    });

    c.bench_function("unique_where_two_fields", |b| {
        let identifier = Identifier::new().with("site", "wg-gesucht").with("listing_number", 42);
        b.iter(|| black_box(unique_where(&identifier)));
    });
}

criterion_group!(benches, bench_encode);
criterion_main!(benches);
