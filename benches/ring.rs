use criterion::{criterion_group, criterion_main, Criterion};
use edgefirst_capture::{
    framebuffer::{BufferCount, FrameBuffer, NO_FLAGS},
    image::PixelFormat,
};
use std::hint::black_box;

fn cycle(fb: &FrameBuffer, len: usize) {
    let mut slot = fb.get_tail(NO_FLAGS).unwrap();
    slot.data_mut()[0] = 0x55;
    slot.commit(len);
    let frame = fb.get_head(NO_FLAGS).unwrap();
    black_box(frame.data()[0]);
    drop(frame);
    fb.free_current();
}

pub fn benchmark_ring(c: &mut Criterion) {
    let mut group = c.benchmark_group("ring");
    let frame = 128 * 128;
    for n in [1u32, 2, 3].iter() {
        let mut fb = FrameBuffer::new(3 * frame, false);
        fb.set_frame(128, 128, PixelFormat::Grayscale);
        fb.set_buffers(BufferCount::Exact(*n)).unwrap();
        fb.setup_buffers();
        group.bench_with_input(format!("{}-buffer", n), &fb, |b, fb| {
            b.iter(|| cycle(fb, frame))
        });
    }
}

criterion_group!(benches, benchmark_ring);
criterion_main!(benches);
