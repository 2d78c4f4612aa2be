use rmpool_ffi::*;
use std::{
    ffi::CStr,
    os::raw::{c_int, c_uint, c_ulong, c_void},
    ptr::null_mut,
    sync::atomic::{AtomicUsize, Ordering},
};

const USE_MAP_ANON: c_uint = 1 << 4;

fn init() {
    let _ = env_logger::builder().is_test(true).try_init();
}

#[test]
fn lifecycle() {
    init();
    unsafe {
        let mut error = 0;
        let pool = mpool_open(USE_MAP_ANON, 0, null_mut(), &mut error);
        assert_eq!(error, MPOOL_ERROR_NONE);
        assert!(!pool.is_null());

        let ptr = mpool_alloc(pool, 100, &mut error);
        assert_eq!(error, MPOOL_ERROR_NONE);
        assert!(!ptr.is_null());

        let mut user: c_ulong = 0;
        let mut page_size: c_uint = 0;
        assert_eq!(
            mpool_stats(pool, &mut page_size, null_mut(), &mut user, null_mut(), null_mut()),
            MPOOL_ERROR_NONE
        );
        assert_eq!(user, 100);
        assert!(page_size > 0);

        assert_eq!(mpool_free(pool, ptr, 100), MPOOL_ERROR_NONE);
        assert_eq!(mpool_free(pool, ptr, 100), 15);
        assert_eq!(mpool_clear(pool), MPOOL_ERROR_NONE);
        assert_eq!(mpool_close(pool), MPOOL_ERROR_NONE);
    }
}

#[test]
fn bad_page_size() {
    init();
    unsafe {
        let mut error = 0;
        let pool = mpool_open(USE_MAP_ANON, 1000, null_mut(), &mut error);
        assert!(pool.is_null());
        assert_eq!(error, 3);
    }
}

#[test]
fn null_pool_uses_libc() {
    init();
    unsafe {
        let mut error = 0;
        let ptr = mpool_calloc(null_mut(), 4, 4, &mut error);
        assert_eq!(error, MPOOL_ERROR_NONE);
        let ptr = mpool_resize(null_mut(), ptr, 16, 64, &mut error);
        assert_eq!(error, MPOOL_ERROR_NONE);
        assert!(!ptr.is_null());
        assert_eq!(mpool_free(null_mut(), ptr, 64), MPOOL_ERROR_NONE);

        assert_eq!(mpool_close(null_mut()), 2);
        assert_eq!(mpool_clear(null_mut()), 2);
        assert_eq!(mpool_set_max_pages(null_mut(), 1), 2);
    }
}

static LOGGED: AtomicUsize = AtomicUsize::new(0);

unsafe extern "C" fn count(
    _mp_p: *const c_void,
    func_id: c_int,
    _byte_size: c_ulong,
    _ele_n: c_ulong,
    _old_addr: *const c_void,
    _new_addr: *const c_void,
    _old_byte_size: c_ulong,
) {
    assert!((1..=6).contains(&func_id));
    LOGGED.fetch_add(1, Ordering::Relaxed);
}

#[test]
fn log_func() {
    init();
    unsafe {
        let pool = mpool_open(USE_MAP_ANON, 0, null_mut(), null_mut());
        assert_eq!(mpool_set_log_func(pool, Some(count)), MPOOL_ERROR_NONE);
        let ptr = mpool_alloc(pool, 8, null_mut());
        mpool_free(pool, ptr, 8);
        assert_eq!(mpool_close(pool), MPOOL_ERROR_NONE);
    }
    assert_eq!(LOGGED.load(Ordering::Relaxed), 3);
}

#[test]
fn strerror() {
    let msg = unsafe { CStr::from_ptr(mpool_strerror(19)) };
    assert_eq!(msg.to_str().unwrap(), "no available pages left in pool");
    let msg = unsafe { CStr::from_ptr(mpool_strerror(0)) };
    assert_eq!(msg.to_str().unwrap(), "invalid error code");
}
