
use crossbeam_epoch::Owned;

/// Pushes enough garbage through the epoch collector that the entries and
/// tables retired by a test are actually freed, so that use-after-free bugs
/// show up under Miri or a sanitizer.
pub(crate) fn run_deferred() {
    for _ in 0..65536 {
        let guard = crossbeam_epoch::pin();

        unsafe { guard.defer_destroy(Owned::new(0).into_shared(&guard)) };

        guard.flush();
    }
}
