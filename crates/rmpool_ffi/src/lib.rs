//! C interface to [`::rmpool`].
//!
//! Every function reports its outcome as one of the integer codes of
//! [`rmpool::Error`], with `MPOOL_ERROR_NONE` (`1`) for success. A null pool
//! pointer given to the allocation functions selects the C library
//! allocator.
#![allow(non_camel_case_types)]
use rmpool::{Error, OsSource, Pool, PoolFlags, Transaction, NO_ERROR};
use std::{
    os::raw::{c_char, c_int, c_uint, c_ulong, c_void},
    ptr::null_mut,
};

/// An opaque pool.
pub type mpool_t = c_void;

type Handle = Pool<OsSource>;

/// The transaction log function.
pub type mpool_log_func_t = Option<
    unsafe extern "C" fn(
        mp_p: *const c_void,
        func_id: c_int,
        byte_size: c_ulong,
        ele_n: c_ulong,
        old_addr: *const c_void,
        new_addr: *const c_void,
        old_byte_size: c_ulong,
    ),
>;

pub const MPOOL_ERROR_NONE: c_int = NO_ERROR;

#[inline]
unsafe fn set_error(error_p: *mut c_int, code: c_int) {
    if !error_p.is_null() {
        *error_p = code;
    }
}

#[inline]
unsafe fn handle<'a>(mp_p: *mut mpool_t) -> Option<&'a mut Handle> {
    mp_p.cast::<Handle>().as_mut()
}

#[inline]
fn code_of<T>(result: &Result<T, Error>) -> c_int {
    rmpool::result_code(result)
}

#[inline]
fn to_usize(x: c_ulong) -> usize {
    x as usize
}

#[no_mangle]
pub unsafe extern "C" fn mpool_open(
    flags: c_uint,
    page_size: c_uint,
    start_addr: *mut c_void,
    error_p: *mut c_int,
) -> *mut mpool_t {
    let flags = PoolFlags::from_bits_truncate(flags);
    let start_addr = Some(start_addr as usize).filter(|&a| a != 0);
    match Pool::open(flags, page_size as usize, start_addr) {
        Ok(pool) => {
            set_error(error_p, MPOOL_ERROR_NONE);
            Box::into_raw(Box::new(pool)).cast()
        }
        Err(e) => {
            set_error(error_p, e.code());
            null_mut()
        }
    }
}

#[no_mangle]
pub unsafe extern "C" fn mpool_close(mp_p: *mut mpool_t) -> c_int {
    if mp_p.is_null() {
        return Error::ArgNull.code();
    }
    let pool = *Box::from_raw(mp_p.cast::<Handle>());
    code_of(&pool.close())
}

#[no_mangle]
pub unsafe extern "C" fn mpool_clear(mp_p: *mut mpool_t) -> c_int {
    match handle(mp_p) {
        Some(pool) => code_of(&pool.clear()),
        None => Error::ArgNull.code(),
    }
}

#[no_mangle]
pub unsafe extern "C" fn mpool_alloc(
    mp_p: *mut mpool_t,
    byte_size: c_ulong,
    error_p: *mut c_int,
) -> *mut c_void {
    let result = match handle(mp_p) {
        Some(pool) => pool.alloc(to_usize(byte_size)).map(|p| p.as_ptr()),
        None => system_result(libc::malloc(to_usize(byte_size))),
    };
    finish(result, error_p)
}

#[no_mangle]
pub unsafe extern "C" fn mpool_calloc(
    mp_p: *mut mpool_t,
    ele_n: c_ulong,
    ele_size: c_ulong,
    error_p: *mut c_int,
) -> *mut c_void {
    let result = match handle(mp_p) {
        Some(pool) => pool
            .calloc(to_usize(ele_n), to_usize(ele_size))
            .map(|p| p.as_ptr()),
        None => system_result(libc::calloc(to_usize(ele_n), to_usize(ele_size))),
    };
    finish(result, error_p)
}

#[no_mangle]
pub unsafe extern "C" fn mpool_free(mp_p: *mut mpool_t, addr: *mut c_void, size: c_ulong) -> c_int {
    match handle(mp_p) {
        Some(pool) => code_of(&pool.free(addr.cast(), to_usize(size))),
        None => {
            if addr.is_null() {
                return Error::ArgNull.code();
            }
            libc::free(addr);
            MPOOL_ERROR_NONE
        }
    }
}

#[no_mangle]
pub unsafe extern "C" fn mpool_resize(
    mp_p: *mut mpool_t,
    old_addr: *mut c_void,
    old_byte_size: c_ulong,
    new_byte_size: c_ulong,
    error_p: *mut c_int,
) -> *mut c_void {
    let result = match handle(mp_p) {
        Some(pool) => pool
            .resize(old_addr.cast(), to_usize(old_byte_size), to_usize(new_byte_size))
            .map(|p| p.as_ptr()),
        None if old_addr.is_null() => Err(Error::ArgNull),
        None => system_result(libc::realloc(old_addr, to_usize(new_byte_size))),
    };
    finish(result, error_p)
}

#[no_mangle]
pub unsafe extern "C" fn mpool_stats(
    mp_p: *const mpool_t,
    page_size_p: *mut c_uint,
    num_alloced_p: *mut c_ulong,
    user_alloced_p: *mut c_ulong,
    max_alloced_p: *mut c_ulong,
    tot_alloced_p: *mut c_ulong,
) -> c_int {
    let pool = match mp_p.cast::<Handle>().as_ref() {
        Some(pool) => pool,
        None => return Error::ArgNull.code(),
    };
    let stats = match pool.stats() {
        Ok(stats) => stats,
        Err(e) => return e.code(),
    };

    if let Some(p) = page_size_p.as_mut() {
        *p = stats.page_size as c_uint;
    }
    for (out, value) in [
        (num_alloced_p, stats.num_alloced),
        (user_alloced_p, stats.user_alloced),
        (max_alloced_p, stats.max_alloced),
        (tot_alloced_p, stats.tot_alloced),
    ] {
        if let Some(out) = out.as_mut() {
            *out = value as c_ulong;
        }
    }
    MPOOL_ERROR_NONE
}

#[no_mangle]
pub unsafe extern "C" fn mpool_set_log_func(
    mp_p: *mut mpool_t,
    log_func: mpool_log_func_t,
) -> c_int {
    let pool = match handle(mp_p) {
        Some(pool) => pool,
        None => return Error::ArgNull.code(),
    };
    let mp_addr = mp_p as usize;
    let log_func = log_func.map(|func| -> rmpool::LogFn {
        Box::new(move |t: &Transaction| {
            let addr = |a: Option<usize>| a.unwrap_or(0) as *const c_void;
            // Safety: The caller promised `func` is callable for the
            // lifetime of the pool
            unsafe {
                func(
                    mp_addr as *const c_void,
                    t.op.code(),
                    t.byte_size as c_ulong,
                    t.elt_count as c_ulong,
                    addr(t.old_addr),
                    addr(t.new_addr),
                    t.old_byte_size as c_ulong,
                )
            }
        })
    });
    code_of(&pool.set_log_func(log_func))
}

#[no_mangle]
pub unsafe extern "C" fn mpool_set_max_pages(mp_p: *mut mpool_t, max_pages: c_uint) -> c_int {
    match handle(mp_p) {
        Some(pool) => code_of(&pool.set_max_pages(max_pages as usize)),
        None => Error::ArgNull.code(),
    }
}

/// Get the message for `error`. The returned string is static.
#[no_mangle]
pub extern "C" fn mpool_strerror(error: c_int) -> *const c_char {
    rmpool::strerror_cstr(error).as_ptr()
}

fn system_result(ptr: *mut c_void) -> Result<*mut u8, Error> {
    if ptr.is_null() {
        log::debug!("the C library allocator failed");
        Err(Error::Alloc)
    } else {
        Ok(ptr.cast())
    }
}

unsafe fn finish(result: Result<*mut u8, Error>, error_p: *mut c_int) -> *mut c_void {
    set_error(error_p, code_of(&result));
    result.map_or(null_mut(), |p| p.cast())
}
