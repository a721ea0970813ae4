use std::env;
use std::os::unix::process::ExitStatusExt;
use std::process::{Command, ExitStatus};
use std::ptr;

use parking_lot::{const_mutex, Mutex};
use proptest::prelude::*;

use fcontext::stack::{self, page_size, stack_count, StackClass, StackConfig, StackStorage};
use fcontext::StackError;

// Tests run in parallel threads but share the process wide stack counter.
static GAUGE: Mutex<()> = const_mutex(());

const DEATH_TEST: &str = "FCONTEXT_DEATH_TEST";

fn rerun_in_child(test: &str) -> ExitStatus {
    Command::new(env::current_exe().unwrap())
        .args(&[test, "--exact", "--nocapture", "--test-threads=1"])
        .env(DEATH_TEST, test)
        .status()
        .unwrap()
}

#[test]
fn create_guarded_stack() -> Result<(), StackError> {
    let _gauge = GAUGE.lock();
    let before = stack_count();

    let storage = stack::allocate(100_000, 4096)?;
    assert!(storage.stacksize() >= 100_000);
    assert_eq!(storage.stacksize() % page_size(), 0);
    assert_eq!(storage.guardsize(), page_size());
    assert!(storage.is_guarded());
    assert_eq!(storage.bottom() as usize % page_size(), 0);
    assert_eq!(stack_count(), before + 1);

    unsafe { stack::deallocate(storage) };
    assert_eq!(stack_count(), before);
    Ok(())
}

#[test]
fn create_unguarded_stack() -> Result<(), StackError> {
    let _gauge = GAUGE.lock();
    let before = stack_count();

    for guard in [0, -1, isize::MIN] {
        let storage = stack::allocate(10, guard)?;
        assert_eq!(storage.stacksize(), 2 * page_size());
        assert_eq!(storage.guardsize(), 0);
        assert!(!storage.is_guarded());
        assert_eq!(stack_count(), before + 1);
        unsafe {
            ptr::write_bytes(storage.limit(), 0xAB, storage.stacksize());
            stack::deallocate(storage);
        }
    }
    assert_eq!(stack_count(), before);
    Ok(())
}

#[test]
fn sizes_round_up_to_pages() -> Result<(), StackError> {
    let _gauge = GAUGE.lock();
    let page = page_size();

    let storage = stack::allocate(3 * page + 1, 1)?;
    assert_eq!(storage.stacksize(), 4 * page);
    assert_eq!(storage.guardsize(), page);
    unsafe { stack::deallocate(storage) };

    let storage = stack::allocate(0, page as isize + 1)?;
    assert_eq!(storage.stacksize(), 2 * page);
    assert_eq!(storage.guardsize(), 2 * page);
    unsafe { stack::deallocate(storage) };
    Ok(())
}

#[test]
fn oversized_request_is_rejected() {
    let _gauge = GAUGE.lock();
    let before = stack_count();
    let error = stack::allocate(usize::MAX, 4096).unwrap_err();
    assert!(matches!(error, StackError::SizeOverflow { .. }));
    assert!(!error.is_resource_exhaustion());
    assert_eq!(stack_count(), before);
}

#[test]
fn whole_usable_region_is_writable() -> Result<(), StackError> {
    let _gauge = GAUGE.lock();
    let storage = stack::allocate(64 * 1024, 4096)?;
    unsafe {
        ptr::write_volatile(storage.limit(), 1u8);
        ptr::write_volatile(storage.bottom().sub(1), 2u8);
        ptr::write_bytes(storage.limit(), 0, storage.stacksize());
        assert_eq!(ptr::read_volatile(storage.limit()), 0);
        stack::deallocate(storage);
    }
    Ok(())
}

#[test]
fn write_to_guard_faults() {
    if env::var(DEATH_TEST).as_deref() == Ok("write_to_guard_faults") {
        let storage = stack::allocate(64 * 1024, 4096).unwrap();
        // Highest byte of the guard region.
        unsafe { ptr::write_volatile(storage.limit().sub(1), 1u8) };
        unreachable!("writing to the guard region did not fault");
    }
    let status = rerun_in_child("write_to_guard_faults");
    assert_eq!(status.signal(), Some(libc::SIGSEGV));
}

#[test]
fn exhausted_address_space_is_reported() {
    if env::var(DEATH_TEST).as_deref() == Ok("exhausted_address_space_is_reported") {
        let limit = libc::rlimit {
            rlim_cur: 512 << 20,
            rlim_max: 512 << 20,
        };
        assert_eq!(unsafe { libc::setrlimit(libc::RLIMIT_AS, &limit) }, 0);
        let before = stack_count();

        let error = stack::allocate(1 << 30, 4096).unwrap_err();
        assert!(matches!(error, StackError::MapFailed { .. }), "{}", error);
        assert!(error.is_resource_exhaustion());

        let error = stack::allocate(1 << 30, 0).unwrap_err();
        assert!(matches!(error, StackError::OutOfMemory { .. }), "{}", error);
        assert!(error.is_resource_exhaustion());

        assert_eq!(stack_count(), before);
        return;
    }
    let status = rerun_in_child("exhausted_address_space_is_reported");
    assert!(status.success(), "child failed: {:?}", status);
}

#[test]
fn degenerate_handle_is_ignored() {
    let _gauge = GAUGE.lock();
    let before = stack_count();
    unsafe { stack::deallocate(StackStorage::default()) };
    assert_eq!(stack_count(), before);
}

#[test]
fn repeated_cycles_do_not_leak() -> Result<(), StackError> {
    let _gauge = GAUGE.lock();
    let before = stack_count();
    // Far more than the default max_map_count if mappings were leaked.
    for i in 0..100_000 {
        let storage = stack::allocate(32 * 1024, if i % 2 == 0 { 4096 } else { 0 })?;
        unsafe { stack::deallocate(storage) };
    }
    assert_eq!(stack_count(), before);
    Ok(())
}

#[test]
fn concurrent_allocations_balance() {
    let _gauge = GAUGE.lock();
    let before = stack_count();

    crossbeam::thread::scope(|s| {
        for t in 0..8 {
            s.spawn(move |_| {
                let mut held = Vec::new();
                for i in 0..500 {
                    let guard = if (t + i) % 3 == 0 { 0 } else { 4096 };
                    held.push(stack::allocate(16 * 1024 + i, guard).unwrap());
                    if held.len() > 16 {
                        unsafe { stack::deallocate(held.remove(0)) };
                    }
                }
                for storage in held {
                    unsafe { stack::deallocate(storage) };
                }
            });
        }
    })
    .unwrap();

    assert_eq!(stack_count(), before);
}

#[test]
fn classes_follow_config() -> Result<(), StackError> {
    let _gauge = GAUGE.lock();
    let before = stack_count();
    let original = stack::config();
    assert_eq!(original, StackConfig::default());

    assert_eq!(StackClass::Small.default_size(), Some(32768));
    assert_eq!(StackClass::Normal.default_size(), Some(1048576));
    assert_eq!(StackClass::Large.default_size(), Some(8388608));
    assert_eq!(StackClass::Pthread.default_size(), None);
    assert_eq!(StackClass::Small.cache_depth(), Some(32));
    assert_eq!(StackClass::Normal.cache_depth(), Some(8));
    assert_eq!(StackClass::Large.cache_depth(), None);

    let storage = stack::allocate_class(StackClass::Small)?;
    assert_eq!(storage.stacksize(), 32768.max(2 * page_size()));
    assert!(storage.is_guarded());
    unsafe { stack::deallocate(storage) };

    assert!(matches!(
        stack::allocate_class(StackClass::Pthread),
        Err(StackError::UnsupportedClass(StackClass::Pthread))
    ));

    stack::set_config(StackConfig {
        stack_size_small: 3 * page_size(),
        guard_page_size: 0,
        ..StackConfig::default()
    });
    let storage = stack::allocate_class(StackClass::Small)?;
    assert_eq!(storage.stacksize(), 3 * page_size());
    assert!(!storage.is_guarded());
    unsafe { stack::deallocate(storage) };
    stack::set_config(original);

    assert_eq!(stack_count(), before);
    Ok(())
}

#[test]
fn config_from_json() {
    let config: StackConfig =
        serde_json::from_str(r#"{ "stack_size_small": 65536, "guard_page_size": -1 }"#).unwrap();
    assert_eq!(config.stack_size_small, 65536);
    assert_eq!(config.guard_page_size, -1);
    assert_eq!(config.stack_size_normal, StackConfig::default().stack_size_normal);
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn allocation_is_page_aligned(size in 1usize..(4 << 20), guard in -8192isize..65536) {
        let _gauge = GAUGE.lock();
        let before = stack_count();

        let storage = stack::allocate(size, guard).unwrap();
        prop_assert!(storage.stacksize() >= size);
        prop_assert!(storage.stacksize() >= 2 * page_size());
        prop_assert_eq!((storage.stacksize() + storage.guardsize()) % page_size(), 0);
        prop_assert_eq!(storage.is_guarded(), guard > 0);
        if guard > 0 {
            prop_assert!(storage.guardsize() >= guard as usize);
        }
        unsafe { stack::deallocate(storage) };
        prop_assert_eq!(stack_count(), before);
    }
}
