//! Demo suite for tinyfixture.
//!
//! Try `-v`, `-g greeting`, `-n grow`, `-r 3`, or `TINYFIXTURE_LOG=run.jsonl`.

#![allow(unsafe_code)]

use std::ptr::NonNull;

use tinyfixture::tinyfixture_guard::{HeapError, SharedHeap};
use tinyfixture::{
    Patchable, Suite, TestGroup, fixture_assert, fixture_assert_eq, fixture_fail, fixture_main,
};

static GREETING_PREFIX: Patchable<&'static str> = Patchable::new("hello");

/// Copy a greeting for `name` into a fresh guarded block.
fn greet(heap: &SharedHeap, name: &str) -> Result<(NonNull<u8>, usize), HeapError> {
    let text = format!("{}, {name}", GREETING_PREFIX.get());
    let block = heap.lock().allocate(text.len())?;
    // SAFETY: the block holds exactly text.len() bytes.
    unsafe { std::ptr::copy_nonoverlapping(text.as_ptr(), block.as_ptr(), text.len()) };
    Ok((block, text.len()))
}

fn read(block: NonNull<u8>, len: usize) -> String {
    // SAFETY: callers pass a live block of at least `len` bytes.
    let bytes = unsafe { std::slice::from_raw_parts(block.as_ptr(), len) };
    String::from_utf8_lossy(bytes).into_owned()
}

fn suite() -> Suite {
    Suite::new()
        .group(
            TestGroup::new("greeting")
                .test("uses_default_prefix", |ctx| {
                    let (block, len) = greet(&ctx.heap_handle(), "world")?;
                    fixture_assert_eq!("hello, world", read(block, len));
                    ctx.heap().release(block.as_ptr())?;
                    Ok(())
                })
                .test("uses_patched_prefix", |ctx| {
                    ctx.patch(&GREETING_PREFIX, "goodbye")?;
                    let (block, len) = greet(&ctx.heap_handle(), "world")?;
                    fixture_assert_eq!("goodbye, world", read(block, len));
                    ctx.heap().release(block.as_ptr())?;
                    Ok(())
                })
                .test("prefix_restored_after_patch", |_| {
                    fixture_assert_eq!("hello", GREETING_PREFIX.get());
                    Ok(())
                }),
        )
        .group(
            TestGroup::new("heap")
                .teardown(|ctx| {
                    fixture_assert_eq!(0, ctx.heap().live_blocks());
                    Ok(())
                })
                .test("grow_keeps_contents", |ctx| {
                    let (block, len) = greet(&ctx.heap_handle(), "abc")?;
                    let Some(grown) = ctx.heap().resize(block.as_ptr(), 64)? else {
                        fixture_fail!("resize to 64 bytes returned nothing");
                    };
                    fixture_assert_eq!("hello, abc", read(grown, len));
                    ctx.heap().release(grown.as_ptr())?;
                    Ok(())
                })
                .test("injected_failure_reaches_caller", |ctx| {
                    ctx.fail_allocations_after(0);
                    let outcome = greet(&ctx.heap_handle(), "nobody");
                    fixture_assert!(matches!(outcome, Err(HeapError::InjectedFailure)));
                    Ok(())
                })
                .test("zeroed_block_is_clear", |ctx| {
                    let block = ctx.heap().zeroed(8, 4)?;
                    fixture_assert!(read(block, 32).bytes().all(|b| b == 0));
                    ctx.heap().release(block.as_ptr())?;
                    Ok(())
                })
                .ignore("arena_exhaustion", |ctx| {
                    let _ = ctx.heap().allocate(1 << 20)?;
                    Ok(())
                }),
        )
}

fn main() {
    std::process::exit(fixture_main(&suite()));
}
