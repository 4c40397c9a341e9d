/// Liveness only; data freshness is reported by `/api/v1/status`.
pub async fn health() -> &'static str {
    "OK"
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_health_does_not_depend_on_telemetry() {
        assert_eq!(health().await, "OK");
    }
}
