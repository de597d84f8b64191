use criterion::criterion_main;


criterion_main!(rent_return::benches, contended::benches);
