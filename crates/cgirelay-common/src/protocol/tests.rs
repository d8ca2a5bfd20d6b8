//! Tests for the protocol module
//!
//! These tests verify message serialization, load lines and document
//! construction.

#[cfg(test)]
mod tests {
    use super::super::*;

    fn all_variants() -> Vec<WorkerMessage> {
        vec![
            WorkerMessage::submit(
                vec![("REQUEST_METHOD".to_string(), "POST".to_string())],
                vec![
                    ("name".to_string(), "caf\u{e9}".to_string()),
                    ("empty".to_string(), String::new()),
                ],
            ),
            WorkerMessage::GetLoad,
            WorkerMessage::SketchStatus,
            WorkerMessage::ShowStatus,
            WorkerMessage::SketchHandlers,
            WorkerMessage::CleanServer,
            WorkerMessage::StopCgiServer,
        ]
    }

    #[test]
    fn test_every_variant_serializes_to_one_line() {
        for message in all_variants() {
            let line = serde_json::to_string(&message).unwrap();
            assert!(!line.contains('\n'), "{} spans lines", message.name());
        }
    }

    #[test]
    fn test_serialization_roundtrip() {
        for message in all_variants() {
            let line = serde_json::to_string(&message).unwrap();
            let decoded: WorkerMessage = serde_json::from_str(&line).unwrap();
            assert_eq!(decoded, message);
        }
    }

    #[test]
    fn test_submit_preserves_field_order() {
        let form = vec![
            ("b".to_string(), "2".to_string()),
            ("a".to_string(), "1".to_string()),
            ("b".to_string(), "3".to_string()),
        ];
        let message = WorkerMessage::submit(vec![], form.clone());
        let line = serde_json::to_string(&message).unwrap();
        match serde_json::from_str::<WorkerMessage>(&line).unwrap() {
            WorkerMessage::Submit { form_env, .. } => assert_eq!(form_env, form),
            other => panic!("Expected Submit, got {:?}", other),
        }
    }

    #[test]
    fn test_unknown_variant_rejected() {
        assert!(serde_json::from_str::<WorkerMessage>(r#"{"type":"reboot"}"#).is_err());
        assert!(serde_json::from_str::<WorkerMessage>(r#"{"kind":"get_load"}"#).is_err());
    }

    #[test]
    fn test_expects_document() {
        assert!(WorkerMessage::ShowStatus.expects_document());
        assert!(WorkerMessage::CleanServer.expects_document());
        assert!(!WorkerMessage::GetLoad.expects_document());
        assert!(!WorkerMessage::StopCgiServer.expects_document());
    }

    #[test]
    fn test_load_lines() {
        assert_eq!(Load::from_line("busy\n"), Load::Busy);
        assert_eq!(Load::from_line("busy since 3s"), Load::Busy);
        assert_eq!(Load::from_line("idle\n"), Load::Idle);
        assert_eq!(Load::from_line(""), Load::Idle);
        assert_eq!(Load::from_line(Load::Busy.as_line()), Load::Busy);
        assert_eq!(Load::from_line(Load::Idle.as_line()), Load::Idle);
    }

    #[test]
    fn test_document_bytes() {
        let doc = Document::text("hello").with_header("Set-Cookie", "a=b");
        let bytes = doc.to_bytes();
        assert_eq!(
            String::from_utf8(bytes).unwrap(),
            "Content-Type: text/plain\nSet-Cookie: a=b\nContent-Length: 5\n\nhello"
        );
    }

    #[test]
    fn test_empty_document_bytes() {
        assert_eq!(Document::default().to_bytes(), b"Content-Length: 0\n\n".to_vec());
    }
}
