use quickcheck_macros::quickcheck;
use rmpool::{system_page_size, Error, Pool, PoolFlags, SizeClasses, NO_ERROR};

fn init() {
    let _ = env_logger::builder().is_test(true).try_init();
}

#[test]
fn basic_lifecycle() {
    init();
    let mut pool = Pool::open(PoolFlags::empty(), 0, None).unwrap();
    let ptr = pool.alloc(100).unwrap();
    assert_eq!(rmpool::result_code(&pool.free(ptr.as_ptr(), 100)), NO_ERROR);
    assert_eq!(rmpool::result_code(&pool.close()), NO_ERROR);
}

#[test]
fn anonymous_mappings() {
    init();
    let mut pool = Pool::open(PoolFlags::USE_MAP_ANON, 0, None).unwrap();
    let stats = pool.stats().unwrap();
    assert_eq!(stats.page_size, system_page_size().unwrap() * 16);
    let ptr = pool.calloc(10, 10).unwrap();
    pool.free(ptr.as_ptr(), 100).unwrap();
    pool.close().unwrap();
}

#[test]
fn oversized_allocation_is_page_aligned() {
    init();
    let page_size = system_page_size().unwrap();
    let mut pool = Pool::open(PoolFlags::USE_MAP_ANON, page_size, None).unwrap();
    let ptr = pool.alloc(page_size * 3).unwrap();
    assert_eq!(ptr.as_ptr() as usize % page_size, 0);
    unsafe { ptr.as_ptr().write_bytes(0xee, page_size * 3) };
    pool.free(ptr.as_ptr(), page_size * 3).unwrap();
}

#[test]
fn double_free_detection() {
    init();
    let mut pool = Pool::open(PoolFlags::empty(), 0, None).unwrap();
    let ptr = pool.alloc(50).unwrap();
    pool.free(ptr.as_ptr(), 50).unwrap();
    assert_eq!(pool.free(ptr.as_ptr(), 50), Err(Error::IsFree));
}

#[test]
fn max_pages_enforcement() {
    init();
    let mut pool = Pool::open(PoolFlags::USE_MAP_ANON, 0, None).unwrap();
    let page_size = pool.page_size();
    pool.set_max_pages(1).unwrap();

    let mut live = 0;
    let err = loop {
        match pool.alloc(page_size / 4) {
            Ok(_) => live += 1,
            Err(e) => break e,
        }
        assert!(live < 8, "cap was not enforced");
    };
    assert_eq!(err, Error::NoPages);
    assert!(live >= 1);
}

#[test]
fn fence_detection() {
    init();
    let mut pool = Pool::open(PoolFlags::USE_MAP_ANON, 0, None).unwrap();
    for size in [1, 7, 16, 100, 5000] {
        let ptr = pool.alloc(size).unwrap();
        unsafe { ptr.as_ptr().add(size).write(0) };
        assert_eq!(pool.free(ptr.as_ptr(), size), Err(Error::PntOver));
    }
}

#[test]
fn idempotent_clear() {
    init();
    let mut pool = Pool::open(PoolFlags::USE_MAP_ANON, 0, None).unwrap();
    let ptr = pool.alloc(500).unwrap();
    pool.free(ptr.as_ptr(), 500).unwrap();
    let total = pool.stats().unwrap().tot_alloced;

    pool.clear().unwrap();
    pool.clear().unwrap();
    let ptr = pool.alloc(pool.page_size() / 2).unwrap();
    assert_eq!(pool.stats().unwrap().tot_alloced, total);
    pool.free(ptr.as_ptr(), pool.page_size() / 2).unwrap();
}

#[cfg(target_pointer_width = "64")]
#[test]
fn start_address_hint_is_optional() {
    init();
    // The hint is only a suggestion; the kernel may place the mapping
    // elsewhere.
    let hint = 0x7000_0000_0000;
    let mut pool = Pool::open(PoolFlags::USE_MAP_ANON, 0, Some(hint)).unwrap();
    let ptr = pool.alloc(64).unwrap();
    pool.free(ptr.as_ptr(), 64).unwrap();
}

#[test]
fn pools_can_move_between_threads() {
    init();
    let mut pool = Pool::open(PoolFlags::USE_MAP_ANON, 0, None).unwrap();
    let addr = pool.alloc(32).unwrap().as_ptr() as usize;
    let pool = std::thread::spawn(move || {
        pool.free(addr as *mut u8, 32).unwrap();
        pool
    })
    .join()
    .unwrap();
    assert_eq!(pool.stats().unwrap().num_alloced, 0);
}

#[quickcheck]
fn conservation_and_monotonic_max(ops: Vec<(bool, u16)>) -> bool {
    let mut pool = Pool::open(PoolFlags::USE_MAP_ANON, 0, None).unwrap();
    let mut live: Vec<(usize, usize)> = Vec::new();
    let mut peak = 0;

    for (is_alloc, n) in ops {
        if is_alloc || live.is_empty() {
            let size = n as usize % 3000 + 1;
            let ptr = pool.alloc(size).unwrap();
            live.push((ptr.as_ptr() as usize, size));
        } else {
            let (addr, size) = live.swap_remove(n as usize % live.len());
            pool.free(addr as *mut u8, size).unwrap();
        }

        let user: usize = live.iter().map(|&(_, size)| size).sum();
        peak = peak.max(user);
        let stats = pool.stats().unwrap();
        if stats.user_alloced != user || stats.max_alloced != peak {
            return false;
        }
    }
    true
}

#[quickcheck]
fn class_floor_and_ceiling(size: u32) -> bool {
    let classes = SizeClasses::get();
    let size = size as usize % (1 << rmpool::MAX_BITS) + 1;
    classes.bits_to_size(classes.size_to_bits(size)) >= size
        && classes.bits_to_size(classes.size_to_free_bits(size)) <= size
}

#[test]
fn strerror_messages() {
    assert_eq!(rmpool::strerror(NO_ERROR), "no error");
    assert_eq!(
        rmpool::strerror(Error::PntOver.code()),
        "user pointer admin space overwritten"
    );
    assert_eq!(rmpool::strerror(99), "invalid error code");
}
