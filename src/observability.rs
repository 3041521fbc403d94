use biometrics::{Collector, Counter, Moments};

pub(crate) static TURNS_STARTED: Counter = Counter::new("palaver.orchestrator.turns_started");
pub(crate) static TURNS_COMPLETED: Counter = Counter::new("palaver.orchestrator.turns_completed");
pub(crate) static TURNS_BLOCKED: Counter = Counter::new("palaver.orchestrator.turns_blocked");
pub(crate) static TURNS_FAILED: Counter = Counter::new("palaver.orchestrator.turns_failed");
pub(crate) static TURNS_CANCELLED: Counter = Counter::new("palaver.orchestrator.turns_cancelled");
pub(crate) static TURN_DURATION: Moments =
    Moments::new("palaver.orchestrator.turn_duration_seconds");

pub(crate) static ASSISTANT_REQUESTS: Counter = Counter::new("palaver.assistant.requests");
pub(crate) static ASSISTANT_ERRORS: Counter = Counter::new("palaver.assistant.errors");
pub(crate) static ASSISTANT_DURATION: Moments =
    Moments::new("palaver.assistant.request_duration_seconds");

pub(crate) static TRANSLATIONS: Counter = Counter::new("palaver.translation.requests");
pub(crate) static TRANSLATION_ERRORS: Counter = Counter::new("palaver.translation.errors");

pub(crate) static SHARES_CREATED: Counter = Counter::new("palaver.share.created");
pub(crate) static SHARES_RESOLVED: Counter = Counter::new("palaver.share.resolved");
pub(crate) static SHARES_EXPIRED: Counter = Counter::new("palaver.share.expired");
pub(crate) static SHARES_SWEPT: Counter = Counter::new("palaver.share.swept");

pub(crate) static EXPORTS: Counter = Counter::new("palaver.export.documents");
pub(crate) static EXPORT_BYTES: Counter = Counter::new("palaver.export.bytes");

pub(crate) static UPLOADS_REJECTED: Counter = Counter::new("palaver.upload.rejected");

pub(crate) static SESSIONS_CREATED: Counter = Counter::new("palaver.session.created");
pub(crate) static SESSIONS_EVICTED: Counter = Counter::new("palaver.session.evicted");

/// Register this crate's biometrics with the provided collector.
pub fn register_biometrics(collector: Collector) {
    collector.register_counter(&TURNS_STARTED);
    collector.register_counter(&TURNS_COMPLETED);
    collector.register_counter(&TURNS_BLOCKED);
    collector.register_counter(&TURNS_FAILED);
    collector.register_counter(&TURNS_CANCELLED);
    collector.register_moments(&TURN_DURATION);

    collector.register_counter(&ASSISTANT_REQUESTS);
    collector.register_counter(&ASSISTANT_ERRORS);
    collector.register_moments(&ASSISTANT_DURATION);

    collector.register_counter(&TRANSLATIONS);
    collector.register_counter(&TRANSLATION_ERRORS);

    collector.register_counter(&SHARES_CREATED);
    collector.register_counter(&SHARES_RESOLVED);
    collector.register_counter(&SHARES_EXPIRED);
    collector.register_counter(&SHARES_SWEPT);

    collector.register_counter(&EXPORTS);
    collector.register_counter(&EXPORT_BYTES);

    collector.register_counter(&UPLOADS_REJECTED);

    collector.register_counter(&SESSIONS_CREATED);
    collector.register_counter(&SESSIONS_EVICTED);
}
