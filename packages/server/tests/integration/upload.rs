use crate::common::{TestApp, part_key, routes};

async fn wait_for_conversion_jobs(app: &TestApp, n: usize) -> Vec<::common::ConversionJob> {
    for _ in 0..100 {
        let jobs = app.converter.jobs();
        if jobs.len() >= n {
            return jobs;
        }
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }
    panic!("expected {n} conversion jobs, got {}", app.converter.jobs().len());
}

mod single_file {
    use super::*;

    #[tokio::test]
    async fn upload_answers_created_with_location() {
        let app = TestApp::spawn().await;
        let key = part_key();
        app.seed_iteration(&key, "rivera");
        let token = app.token("rivera");

        let res = app
            .upload(
                &routes::iteration(&key),
                vec![("bracket.step", b"solid bracket".to_vec())],
                &token,
            )
            .await;

        assert_eq!(res.status().as_u16(), 201);
        let location = res.headers().get("location").unwrap().to_str().unwrap();
        assert!(location.ends_with(&format!("{}/bracket.step", routes::iteration(&key))));
    }

    #[tokio::test]
    async fn uploaded_bytes_round_trip() {
        let app = TestApp::spawn().await;
        let key = part_key();
        app.seed_iteration(&key, "rivera");
        let token = app.token("rivera");

        app.upload(
            &routes::iteration(&key),
            vec![("data.bin", b"exact payload".to_vec())],
            &token,
        )
        .await;

        let res = app.download(&routes::file(&key, "data.bin"), &token).await;
        assert_eq!(res.status().as_u16(), 200);
        assert_eq!(
            res.headers().get("content-length").unwrap().to_str().unwrap(),
            "13"
        );
        assert_eq!(res.bytes().await.unwrap().as_ref(), b"exact payload");
    }

    #[tokio::test]
    async fn zero_length_file_round_trips() {
        let app = TestApp::spawn().await;
        let key = part_key();
        app.seed_iteration(&key, "rivera");
        let token = app.token("rivera");

        let res = app
            .upload(&routes::iteration(&key), vec![("empty.txt", vec![])], &token)
            .await;
        assert_eq!(res.status().as_u16(), 201);

        let res = app.download(&routes::file(&key, "empty.txt"), &token).await;
        assert_eq!(res.status().as_u16(), 200);
        assert_eq!(
            res.headers().get("content-length").unwrap().to_str().unwrap(),
            "0"
        );
        assert!(res.bytes().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn single_byte_file_round_trips() {
        let app = TestApp::spawn().await;
        let key = part_key();
        app.seed_iteration(&key, "rivera");
        let token = app.token("rivera");

        app.upload(&routes::iteration(&key), vec![("one.bin", vec![0x5a])], &token)
            .await;

        let res = app.download(&routes::file(&key, "one.bin"), &token).await;
        assert_eq!(res.bytes().await.unwrap().as_ref(), [0x5a]);
    }

    #[tokio::test]
    async fn reupload_replaces_content_and_changes_etag() {
        let app = TestApp::spawn().await;
        let key = part_key();
        app.seed_iteration(&key, "rivera");
        let token = app.token("rivera");

        app.upload(&routes::iteration(&key), vec![("f.txt", b"v1".to_vec())], &token)
            .await;
        let first = app.download(&routes::file(&key, "f.txt"), &token).await;
        let etag1 = first.headers().get("etag").unwrap().to_str().unwrap().to_string();

        app.upload(
            &routes::iteration(&key),
            vec![("f.txt", b"second".to_vec())],
            &token,
        )
        .await;
        let second = app.download(&routes::file(&key, "f.txt"), &token).await;
        let etag2 = second.headers().get("etag").unwrap().to_str().unwrap().to_string();

        assert_ne!(etag1, etag2);
        assert_eq!(second.bytes().await.unwrap().as_ref(), b"second");
    }
}

mod multiple_files {
    use super::*;

    #[tokio::test]
    async fn several_files_answer_ok_without_location() {
        let app = TestApp::spawn().await;
        let key = part_key();
        app.seed_iteration(&key, "rivera");
        let token = app.token("rivera");

        let res = app
            .upload(
                &routes::iteration(&key),
                vec![
                    ("a.txt", b"aaa".to_vec()),
                    ("b.txt", b"bbb".to_vec()),
                ],
                &token,
            )
            .await;

        assert_eq!(res.status().as_u16(), 200);
        assert!(res.headers().get("location").is_none());

        let a = app.download(&routes::file(&key, "a.txt"), &token).await;
        assert_eq!(a.bytes().await.unwrap().as_ref(), b"aaa");
        let b = app.download(&routes::file(&key, "b.txt"), &token).await;
        assert_eq!(b.bytes().await.unwrap().as_ref(), b"bbb");
    }

    #[tokio::test]
    async fn failing_part_keeps_earlier_parts_and_reports_partial_success() {
        let app = TestApp::spawn().await;
        let key = part_key();
        app.seed_iteration(&key, "rivera");
        let token = app.token("rivera");

        let res = app
            .upload(
                &routes::iteration(&key),
                vec![
                    ("good.txt", b"stored".to_vec()),
                    ("..", b"broken".to_vec()),
                ],
                &token,
            )
            .await;

        assert_eq!(res.status().as_u16(), 400);
        let body: serde_json::Value = res.json().await.unwrap();
        assert_eq!(body["code"].as_str().unwrap(), "VALIDATION_ERROR");
        assert!(
            body["message"]
                .as_str()
                .unwrap()
                .contains("stored 1 of 2 uploaded files before failure"),
            "partial success must be surfaced: {}",
            body["message"]
        );

        // The first part stays finalized.
        let good = app.download(&routes::file(&key, "good.txt"), &token).await;
        assert_eq!(good.status().as_u16(), 200);
        assert_eq!(good.bytes().await.unwrap().as_ref(), b"stored");
    }
}

mod validation_and_access {
    use super::*;

    #[tokio::test]
    async fn upload_to_unknown_iteration_returns_404() {
        let app = TestApp::spawn().await;
        let key = part_key();
        // Iteration never created, but the user can write to the workspace.
        app.registry.grant_write(&key.workspace, "rivera");
        let token = app.token("rivera");

        let res = app
            .upload(&routes::iteration(&key), vec![("f.txt", b"x".to_vec())], &token)
            .await;
        assert_eq!(res.status().as_u16(), 404);
    }

    #[tokio::test]
    async fn upload_to_frozen_iteration_is_not_allowed() {
        let app = TestApp::spawn().await;
        let key = part_key();
        app.seed_iteration(&key, "rivera");
        app.registry.freeze_iteration(&key);
        let token = app.token("rivera");

        let res = app
            .upload(&routes::iteration(&key), vec![("f.txt", b"x".to_vec())], &token)
            .await;
        assert_eq!(res.status().as_u16(), 403);
        let body: serde_json::Value = res.json().await.unwrap();
        assert_eq!(body["code"].as_str().unwrap(), "NOT_ALLOWED");
    }

    #[tokio::test]
    async fn upload_without_write_access_is_denied() {
        let app = TestApp::spawn().await;
        let key = part_key();
        app.registry.create_iteration(key.clone());
        app.registry.grant_read(&key.workspace, "viewer");
        let token = app.token("viewer");

        let res = app
            .upload(&routes::iteration(&key), vec![("f.txt", b"x".to_vec())], &token)
            .await;
        assert_eq!(res.status().as_u16(), 403);
        let body: serde_json::Value = res.json().await.unwrap();
        assert_eq!(body["code"].as_str().unwrap(), "PERMISSION_DENIED");
    }

    #[tokio::test]
    async fn inactive_user_cannot_upload() {
        let app = TestApp::spawn().await;
        let key = part_key();
        app.seed_iteration(&key, "rivera");
        let token = app.inactive_token("rivera");

        let res = app
            .upload(&routes::iteration(&key), vec![("f.txt", b"x".to_vec())], &token)
            .await;
        assert_eq!(res.status().as_u16(), 403);
        let body: serde_json::Value = res.json().await.unwrap();
        assert_eq!(body["code"].as_str().unwrap(), "USER_NOT_ACTIVE");
    }

    #[tokio::test]
    async fn upload_without_token_is_unauthorized() {
        let app = TestApp::spawn().await;
        let key = part_key();
        app.seed_iteration(&key, "rivera");

        let form = reqwest::multipart::Form::new().part(
            "file",
            reqwest::multipart::Part::bytes(b"x".to_vec()).file_name("f.txt"),
        );
        let res = app
            .client
            .post(app.url(&routes::iteration(&key)))
            .multipart(form)
            .send()
            .await
            .unwrap();
        assert_eq!(res.status().as_u16(), 401);
    }

    #[tokio::test]
    async fn upload_rejects_control_characters_in_filename() {
        let app = TestApp::spawn().await;
        let key = part_key();
        app.seed_iteration(&key, "rivera");
        let token = app.token("rivera");

        let res = app
            .upload(
                &routes::iteration(&key),
                vec![("file\r\nname.txt", b"x".to_vec())],
                &token,
            )
            .await;
        assert_eq!(res.status().as_u16(), 400);
    }

    #[tokio::test]
    async fn upload_without_file_part_returns_400() {
        let app = TestApp::spawn().await;
        let key = part_key();
        app.seed_iteration(&key, "rivera");
        let token = app.token("rivera");

        let form = reqwest::multipart::Form::new().text("note", "no file here");
        let res = app
            .client
            .post(app.url(&routes::iteration(&key)))
            .header("Authorization", format!("Bearer {token}"))
            .multipart(form)
            .send()
            .await
            .unwrap();
        assert_eq!(res.status().as_u16(), 400);
    }

    #[tokio::test]
    async fn upload_rejects_invalid_sub_type() {
        let app = TestApp::spawn().await;
        let key = part_key();
        app.seed_iteration(&key, "rivera");
        let token = app.token("rivera");

        let res = app
            .upload(
                &routes::iteration_sub(&key, "not valid"),
                vec![("f.txt", b"x".to_vec())],
                &token,
            )
            .await;
        assert_eq!(res.status().as_u16(), 400);
    }
}

mod cad_conversion {
    use super::*;
    use crate::common::document_key;

    #[tokio::test]
    async fn native_cad_upload_triggers_conversion() {
        let app = TestApp::spawn().await;
        let key = part_key();
        app.seed_iteration(&key, "rivera");
        let token = app.token("rivera");

        let res = app
            .upload(
                &routes::iteration_sub(&key, "nativecad"),
                vec![("model.catpart", vec![0u8; 10])],
                &token,
            )
            .await;
        assert_eq!(res.status().as_u16(), 201);

        let jobs = wait_for_conversion_jobs(&app, 1).await;
        assert_eq!(jobs[0].sub_type, "nativecad");
        assert_eq!(jobs[0].cad_file, "wks/parts/P1/A/3/nativecad/model.catpart");
        assert_eq!(jobs[0].iteration, key);
    }

    #[tokio::test]
    async fn conversion_failure_never_surfaces_to_the_uploader() {
        let app = TestApp::spawn_with_failing_converter(true).await;
        let key = part_key();
        app.seed_iteration(&key, "rivera");
        let token = app.token("rivera");

        let res = app
            .upload(
                &routes::iteration_sub(&key, "nativecad"),
                vec![("model.catpart", b"cad bytes".to_vec())],
                &token,
            )
            .await;

        // The upload already committed; the converter blowing up is logged only.
        assert_eq!(res.status().as_u16(), 201);
        wait_for_conversion_jobs(&app, 1).await;

        let res = app
            .download(&routes::sub_file(&key, "nativecad", "model.catpart"), &token)
            .await;
        assert_eq!(res.bytes().await.unwrap().as_ref(), b"cad bytes");
    }

    #[tokio::test]
    async fn plain_upload_does_not_trigger_conversion() {
        let app = TestApp::spawn().await;
        let key = part_key();
        app.seed_iteration(&key, "rivera");
        let token = app.token("rivera");

        app.upload(
            &routes::iteration(&key),
            vec![("readme.txt", b"no cad".to_vec())],
            &token,
        )
        .await;

        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        assert!(app.converter.jobs().is_empty());
    }

    #[tokio::test]
    async fn sub_typed_document_upload_does_not_trigger_conversion() {
        let app = TestApp::spawn().await;
        let key = document_key();
        app.seed_iteration(&key, "rivera");
        let token = app.token("rivera");

        let res = app
            .upload(
                &routes::iteration_sub(&key, "scans"),
                vec![("page1.tiff", b"tiff".to_vec())],
                &token,
            )
            .await;
        assert_eq!(res.status().as_u16(), 201);

        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        assert!(app.converter.jobs().is_empty());
    }
}
