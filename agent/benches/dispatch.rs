use std::sync::{Arc, Mutex};

use criterion::{black_box, criterion_group, criterion_main, Criterion};

use spawnhook_agent::{EntryPoint, HookRegistry, PosixSpawnFn, SpinGuard};
use spawnhook_intercept::{DispatchTable, TableEngine};

unsafe extern "C" fn null_spawn(
    pid: *mut libc::pid_t,
    _path: *const libc::c_char,
    _file_actions: *const libc::posix_spawn_file_actions_t,
    _attrp: *const libc::posix_spawnattr_t,
    _argv: *const *mut libc::c_char,
    _envp: *const *mut libc::c_char,
) -> libc::c_int {
    *pid = 1;
    0
}

fn call(f: PosixSpawnFn) -> libc::c_int {
    let mut pid: libc::pid_t = 0;
    let path = c"/bin/true";
    let argv = [std::ptr::null_mut()];
    let envp = [std::ptr::null_mut()];
    unsafe {
        f(
            &mut pid,
            path.as_ptr(),
            std::ptr::null(),
            std::ptr::null(),
            argv.as_ptr(),
            envp.as_ptr(),
        )
    }
}

fn bench_guard(c: &mut Criterion) {
    let spin = SpinGuard::new(0u64);
    c.bench_function("spin_guard_increment", |b| {
        b.iter(|| *spin.lock() += black_box(1))
    });

    let mutex = Mutex::new(0u64);
    c.bench_function("mutex_increment", |b| {
        b.iter(|| *mutex.lock().unwrap() += black_box(1))
    });
}

fn bench_dispatch(c: &mut Criterion) {
    let table = Arc::new(
        DispatchTable::new()
            .with_slot("posix_spawn", null_spawn as usize)
            .with_slot("posix_spawnp", null_spawn as usize),
    );

    c.bench_function("direct_call", |b| {
        b.iter(|| call(black_box(null_spawn as PosixSpawnFn)))
    });

    let mut registry = HookRegistry::new(TableEngine::new(table.clone()));
    registry
        .install(&EntryPoint::ALL)
        .expect("table engine installs");
    let hooked: PosixSpawnFn =
        unsafe { table.function("posix_spawn") }.expect("posix_spawn slot");
    c.bench_function("intercepted_call", |b| b.iter(|| call(black_box(hooked))));
}

criterion_group!(benches, bench_guard, bench_dispatch);
criterion_main!(benches);
