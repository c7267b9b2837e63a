//! Observation hooks fired on the publish/subscribe/connect lifecycle.
//!
//! The broker core never depends on a concrete interceptor; it only
//! ever holds an `Arc<dyn Interceptor>`, so a deployment can swap in
//! metrics or audit logging without touching the processor.

use mercurio_core::qos::QoS;

pub trait Interceptor: Send + Sync {
    fn notify_client_connected(&self, client_id: &str) {
        let _ = client_id;
    }

    fn notify_client_disconnected(&self, client_id: &str, reason: &str) {
        let _ = (client_id, reason);
    }

    fn notify_topic_published(&self, client_id: &str, topic: &str, qos: QoS) {
        let _ = (client_id, topic, qos);
    }

    fn notify_topic_subscribed(&self, client_id: &str, topic_filter: &str, qos: QoS) {
        let _ = (client_id, topic_filter, qos);
    }

    fn notify_topic_unsubscribed(&self, client_id: &str, topic_filter: &str) {
        let _ = (client_id, topic_filter);
    }
}

/// Default interceptor: every hook becomes a `tracing` event.
#[derive(Default)]
pub struct TracingInterceptor;

impl Interceptor for TracingInterceptor {
    fn notify_client_connected(&self, client_id: &str) {
        tracing::info!(client_id, "client connected");
    }

    fn notify_client_disconnected(&self, client_id: &str, reason: &str) {
        tracing::info!(client_id, reason, "client disconnected");
    }

    fn notify_topic_published(&self, client_id: &str, topic: &str, qos: QoS) {
        tracing::debug!(client_id, topic, ?qos, "message published");
    }

    fn notify_topic_subscribed(&self, client_id: &str, topic_filter: &str, qos: QoS) {
        tracing::debug!(client_id, topic_filter, ?qos, "client subscribed");
    }

    fn notify_topic_unsubscribed(&self, client_id: &str, topic_filter: &str) {
        tracing::debug!(client_id, topic_filter, "client unsubscribed");
    }
}
