mod common;

use std::sync::Arc;
use std::sync::atomic::Ordering;

use common::{MockConnector, ScriptedPrompter, empty_credentials, recording_adapter};
use haul_fetch::channel::scp::ConnectError;
use haul_fetch::{
    ChannelKind, ChannelRegistry, CredentialCache, CredentialConfig, CredentialResolver,
    Downloader, Error, ScpChannel, TransferOptions,
};

fn downloader(
    connector: Arc<MockConnector>,
    credentials: CredentialResolver,
    prompter: Arc<ScriptedPrompter>,
) -> Downloader {
    let mut registry = ChannelRegistry::new();
    registry
        .register(
            "scp",
            ChannelKind::Scp(Arc::new(ScpChannel::with_connector(connector, credentials))),
        )
        .unwrap();
    let (adapter, _) = recording_adapter(prompter);
    Downloader::with_registry(registry, adapter)
}

fn scp() -> TransferOptions {
    TransferOptions::default().channel("scp")
}

#[tokio::test]
async fn wrong_passphrase_reconnects_with_a_fresh_session() {
    let ssh_dir = tempfile::tempdir().unwrap();
    std::fs::write(ssh_dir.path().join("id_rsa"), b"KEY").unwrap();
    let cache = Arc::new(CredentialCache::new());
    let credentials = CredentialResolver::new(
        CredentialConfig {
            ssh_dir: ssh_dir.path().to_path_buf(),
            hosts: Default::default(),
        },
        Arc::clone(&cache),
    )
    .unwrap();

    let connector = Arc::new(MockConnector::new(
        [
            Err(ConnectError::Passphrase("Encrypted private key detected, but no passphrase given".into())),
            Err(ConnectError::Passphrase("Wrong passphrase".into())),
        ],
        &[("/srv/a.txt", "alpha")],
    ));
    let prompter = Arc::new(ScriptedPrompter::passphrases([Some("one"), Some("two")]));
    let dest = tempfile::tempdir().unwrap();

    let report = downloader(connector.clone(), credentials, prompter.clone())
        .download("deploy@build.example:/srv/a.txt", dest.path(), scp())
        .await
        .unwrap();

    assert_eq!(report.files, vec![dest.path().join("a.txt")]);
    assert_eq!(std::fs::read(dest.path().join("a.txt")).unwrap(), b"alpha");
    assert_eq!(prompter.passphrase_calls.load(Ordering::SeqCst), 2);
    assert_eq!(prompter.username_calls.load(Ordering::SeqCst), 0);

    let sessions = connector.sessions();
    assert_eq!(sessions.len(), 3);
    for session in &sessions {
        assert_eq!(session.closes.load(Ordering::SeqCst), 1, "session {}", session.id);
    }
    let last = sessions[2].seen.lock().unwrap().clone().unwrap();
    assert_eq!(last.username, "deploy");
    assert_eq!(last.passphrase.as_deref(), Some("two"));
    assert_eq!(last.private_key.as_deref(), Some(&b"KEY"[..]));

    let cached = cache.key(&ssh_dir.path().join("id_rsa")).unwrap();
    assert_eq!(cached.passphrase.as_deref(), Some("two"));
}

#[tokio::test]
async fn abandoned_passphrase_prompt_fails() {
    let ssh_dir = tempfile::tempdir().unwrap();
    let connector = Arc::new(MockConnector::new(
        [Err(ConnectError::Passphrase("Wrong passphrase".into()))],
        &[],
    ));
    let prompter = Arc::new(ScriptedPrompter::passphrases([None]));
    let dest = tempfile::tempdir().unwrap();

    let result = downloader(connector.clone(), empty_credentials(ssh_dir.path()), prompter)
        .download("u@build:/srv/a.txt", dest.path(), scp())
        .await;

    assert!(matches!(result, Err(Error::PassphraseRequired { host }) if host == "build"));
    assert_eq!(connector.sessions().len(), 1);
}

#[tokio::test]
async fn authentication_failure_is_terminal() {
    let ssh_dir = tempfile::tempdir().unwrap();
    let connector = Arc::new(MockConnector::new(
        [Err(ConnectError::Authentication("denied".into()))],
        &[("/srv/a.txt", "alpha")],
    ));
    let prompter = Arc::new(ScriptedPrompter::passphrases([Some("unused")]));
    let dest = tempfile::tempdir().unwrap();

    let result = downloader(connector.clone(), empty_credentials(ssh_dir.path()), prompter.clone())
        .download("u:pw@build:/srv/a.txt", dest.path(), scp())
        .await;

    assert!(matches!(result, Err(Error::AuthenticationFailed { host, .. }) if host == "build"));
    assert_eq!(prompter.passphrase_calls.load(Ordering::SeqCst), 0);
    let sessions = connector.sessions();
    assert_eq!(sessions.len(), 1);
    assert_eq!(sessions[0].closes.load(Ordering::SeqCst), 1);
    let seen = sessions[0].seen.lock().unwrap().clone().unwrap();
    assert_eq!(seen.password.as_deref(), Some("pw"));
}

#[tokio::test]
async fn missing_remote_file_is_reported_not_fatal() {
    let ssh_dir = tempfile::tempdir().unwrap();
    let connector = Arc::new(MockConnector::new([], &[("/srv/a.txt", "alpha")]));
    let prompter = Arc::new(ScriptedPrompter::default());
    let dest = tempfile::tempdir().unwrap();

    let report = downloader(connector.clone(), empty_credentials(ssh_dir.path()), prompter.clone())
        .download(
            vec!["build:/srv/a.txt", "build:/srv/missing.txt"],
            dest.path(),
            scp(),
        )
        .await
        .unwrap();

    assert_eq!(prompter.username_calls.load(Ordering::SeqCst), 1);
    assert_eq!(report.files, vec![dest.path().join("a.txt")]);
    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].location, "/srv/missing.txt");
    assert!(matches!(report.failures[0].error, Error::RemoteStatFailed { .. }));
    assert!(!dest.path().join("missing.txt").exists());
    assert_eq!(connector.sessions()[0].closes.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn host_option_takes_plain_paths() {
    let ssh_dir = tempfile::tempdir().unwrap();
    let connector = Arc::new(MockConnector::new([], &[("/etc/motd", "hello")]));
    let dest = tempfile::tempdir().unwrap();

    downloader(
        connector.clone(),
        empty_credentials(ssh_dir.path()),
        Arc::new(ScriptedPrompter::default()),
    )
    .download(
        "/etc/motd",
        dest.path(),
        scp().host("mirror").username("ops").port(2222),
    )
    .await
    .unwrap();

    let seen = connector.sessions()[0].seen.lock().unwrap().clone().unwrap();
    assert_eq!(seen.host, "mirror");
    assert_eq!(seen.port, 2222);
    assert_eq!(seen.username, "ops");
    assert!(seen.private_key.is_none());
    assert!(dest.path().join("motd").exists());
}

#[tokio::test]
async fn abandoning_a_prepared_request_closes_once() {
    let ssh_dir = tempfile::tempdir().unwrap();
    let connector = Arc::new(MockConnector::new([], &[("/srv/a.txt", "alpha")]));
    let dest = tempfile::tempdir().unwrap();

    let prepared = downloader(
        connector.clone(),
        empty_credentials(ssh_dir.path()),
        Arc::new(ScriptedPrompter::default()),
    )
    .request("u@build:/srv/a.txt", dest.path(), scp())
    .unwrap()
    .prepare()
    .await
    .unwrap();

    assert!(prepared.request().connection.is_some());
    prepared.abandon().await.unwrap();

    assert_eq!(connector.sessions()[0].closes.load(Ordering::SeqCst), 1);
    assert!(!dest.path().join("a.txt").exists());
}

#[tokio::test]
async fn repeated_cleanup_closes_the_session_once() {
    let ssh_dir = tempfile::tempdir().unwrap();
    let connector = Arc::new(MockConnector::new([], &[("/srv/a.txt", "alpha")]));
    let dest = tempfile::tempdir().unwrap();
    let downloader = downloader(
        connector.clone(),
        empty_credentials(ssh_dir.path()),
        Arc::new(ScriptedPrompter::default()),
    );

    let prepared = downloader
        .request("u@build:/srv/a.txt", dest.path(), scp())
        .unwrap()
        .prepare()
        .await
        .unwrap();
    let request = prepared.request().clone();
    let connection = request.connection.clone().unwrap();

    let channel = request.channel.clone();
    let released = channel.as_channel().cleanup(request).await.unwrap();
    assert!(released.connection.is_none());
    channel.as_channel().cleanup(released).await.unwrap();
    connection.close().await;
    connection.close().await;
    assert_eq!(connector.sessions()[0].closes.load(Ordering::SeqCst), 1);

    let fresh = downloader
        .request("u@build:/srv/a.txt", dest.path(), scp())
        .unwrap()
        .prepare()
        .await
        .unwrap();
    let sessions = connector.sessions();
    assert_eq!(sessions.len(), 2);
    assert_eq!(sessions[1].closes.load(Ordering::SeqCst), 0);

    prepared.abandon().await.unwrap();
    assert_eq!(sessions[0].closes.load(Ordering::SeqCst), 1);
    assert_eq!(sessions[1].closes.load(Ordering::SeqCst), 0);

    fresh.write().await.unwrap();
    assert_eq!(sessions[1].closes.load(Ordering::SeqCst), 1);
    assert_eq!(std::fs::read(dest.path().join("a.txt")).unwrap(), b"alpha");
}

#[tokio::test]
async fn explicit_key_passphrase_is_not_cached_for_the_host() {
    let ssh_dir = tempfile::tempdir().unwrap();
    let key_file = ssh_dir.path().join("id_rsa");
    std::fs::write(&key_file, b"KEY").unwrap();
    let cache = Arc::new(CredentialCache::new());
    let credentials = CredentialResolver::new(
        CredentialConfig {
            ssh_dir: ssh_dir.path().to_path_buf(),
            hosts: Default::default(),
        },
        Arc::clone(&cache),
    )
    .unwrap();
    assert!(credentials.resolve("build").await.is_some());

    let connector = Arc::new(MockConnector::new(
        [Err(ConnectError::Passphrase("Wrong passphrase".into()))],
        &[("/srv/a.txt", "alpha")],
    ));
    let prompter = Arc::new(ScriptedPrompter::passphrases([Some("other")]));
    let dest = tempfile::tempdir().unwrap();

    downloader(connector.clone(), credentials, prompter.clone())
        .download(
            "u@build:/srv/a.txt",
            dest.path(),
            scp().private_key(b"OTHER".to_vec()),
        )
        .await
        .unwrap();

    assert_eq!(prompter.passphrase_calls.load(Ordering::SeqCst), 1);
    let last = connector.sessions()[1].seen.lock().unwrap().clone().unwrap();
    assert_eq!(last.private_key.as_deref(), Some(&b"OTHER"[..]));
    assert_eq!(last.passphrase.as_deref(), Some("other"));
    assert!(cache.key(&key_file).unwrap().passphrase.is_none());
}
