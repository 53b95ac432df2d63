//! Stream naming convention, used symmetrically by producers and consumers.

/// The input stream for an agent.
pub fn task_stream(agent: &str) -> String {
    format!("agent_{agent}_tasks")
}

/// Inverse of [`task_stream`].
pub fn agent_of_stream(stream: &str) -> Option<&str> {
    stream.strip_prefix("agent_")?.strip_suffix("_tasks")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn naming_is_symmetric() {
        let stream = task_stream("codegen");
        assert_eq!(stream, "agent_codegen_tasks");
        assert_eq!(agent_of_stream(&stream), Some("codegen"));
    }

    #[test]
    fn foreign_streams_do_not_parse() {
        assert_eq!(agent_of_stream("thread.deltas"), None);
        assert_eq!(agent_of_stream("agent_nosuffix"), None);
    }
}
