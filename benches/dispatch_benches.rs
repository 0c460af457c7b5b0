use criterion::{black_box, criterion_group, criterion_main, Criterion};
use hart_slave::command::{
    CMD_READ_DEVICE_VARIABLES, CMD_READ_DYNAMIC_VARIABLES, CMD_READ_UNIQUE_ID,
};
use hart_slave::{CommandRequest, Device, DeviceConfig, Master};

fn ready_device() -> Device {
    let mut device = Device::new(DeviceConfig::new(0x123456).with_tag("FT-101")).unwrap();
    device.handle_bridge_message(b"U,42480000,41A00000,41400000,00\n");
    device
}

fn bench_commands(c: &mut Criterion) {
    let mut group = c.benchmark_group("dispatch");
    let mut device = ready_device();

    group.bench_function("read_unique_id", |b| {
        let request = CommandRequest::long(Master::Primary, CMD_READ_UNIQUE_ID, &[]);
        b.iter(|| device.handle_frame(black_box(&request)))
    });

    group.bench_function("read_dynamic_variables", |b| {
        let request = CommandRequest::long(Master::Primary, CMD_READ_DYNAMIC_VARIABLES, &[]);
        b.iter(|| device.handle_frame(black_box(&request)))
    });

    group.bench_function("read_device_variables_8_slots", |b| {
        let codes = [0u8, 1, 244, 245, 246, 247, 2, 3];
        let request = CommandRequest::long(Master::Secondary, CMD_READ_DEVICE_VARIABLES, &codes);
        b.iter(|| device.handle_frame(black_box(&request)))
    });

    group.finish();
}

fn bench_bridge(c: &mut Criterion) {
    let mut group = c.benchmark_group("bridge");
    let mut device = ready_device();

    group.bench_function("update", |b| {
        b.iter(|| device.handle_bridge_message(black_box(b"U,42480000,41A00000,41400000,00\n")))
    });

    group.bench_function("poll", |b| {
        b.iter(|| device.handle_bridge_message(black_box(b"P,00\n")))
    });

    group.bench_function("rejected", |b| {
        b.iter(|| device.handle_bridge_message(black_box(b"U,4248000G,41A00000,41400000,00\n")))
    });

    group.finish();
}

criterion_group!(benches, bench_commands, bench_bridge);
criterion_main!(benches);
