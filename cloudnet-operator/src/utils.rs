pub(crate) fn metric_name(name: &str) -> String {
    format!("cloudnet_operator_{}", name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prefixed() {
        assert_eq!("cloudnet_operator_reconcile_count", metric_name("reconcile_count"));
    }
}
