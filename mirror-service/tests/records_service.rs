//! End-to-end tests: a YAML records file driving syncs and live watches.

use std::fs;
use std::path::Path;
use std::time::Duration;

use pretty_assertions::assert_eq;
use strm_mirror_service::{MirrorService, ServiceConfig, YamlRecordStore};
use tempfile::TempDir;

const DEADLINE: Duration = Duration::from_secs(10);

async fn wait_for(mut condition: impl FnMut() -> bool) -> bool {
    let start = std::time::Instant::now();
    while start.elapsed() < DEADLINE {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    condition()
}

fn write_records(path: &Path, source: &Path, target: &Path) {
    let yaml = format!(
        concat!(
            "records:\n",
            "  - id: movies\n",
            "    source_folder: {}\n",
            "    target_folder: {}\n",
            "    search_string: /mnt/media\n",
            "    replacement_string: http://nas:8096\n",
        ),
        source.display(),
        target.display()
    );
    fs::write(path, yaml).unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_config_driven_sync_and_watch() {
    let temp_dir = TempDir::new().unwrap();
    let source = temp_dir.path().join("library");
    let target = temp_dir.path().join("mirror");
    fs::create_dir_all(source.join("Film (2020)")).unwrap();
    fs::write(source.join("Film (2020)/Film.strm"), "/mnt/media/Film.mkv").unwrap();
    fs::write(source.join("Film (2020)/poster.jpg"), [0xFF, 0xD8, 0xFF]).unwrap();

    let records_path = temp_dir.path().join("records.yaml");
    write_records(&records_path, &source, &target);

    let config = ServiceConfig::new(&records_path).with_debounce_ms(100);
    let service = MirrorService::from_config(&config).unwrap();

    let stats = service.sync_all_records().await.unwrap();
    assert_eq!((stats.created, stats.errors), (2, 0));
    assert_eq!(
        fs::read_to_string(target.join("Film (2020)/Film.strm")).unwrap(),
        "http://nas:8096/Film.mkv"
    );
    assert_eq!(
        fs::read(target.join("Film (2020)/poster.jpg")).unwrap(),
        vec![0xFF, 0xD8, 0xFF]
    );

    let summary = service.start_watch(None).await.unwrap();
    assert_eq!((summary.started, summary.total), (1, 1));
    assert_eq!(service.status().await.unwrap().get("movies"), Some(&true));

    fs::write(source.join("Film (2020)/Extra.strm"), "/mnt/media/Extra.mkv").unwrap();
    let extra = target.join("Film (2020)/Extra.strm");
    assert!(
        wait_for(|| fs::read_to_string(&extra).ok().as_deref() == Some("http://nas:8096/Extra.mkv"))
            .await,
        "watched change was not mirrored"
    );

    fs::remove_file(source.join("Film (2020)/poster.jpg")).unwrap();
    let poster = target.join("Film (2020)/poster.jpg");
    assert!(
        wait_for(|| !poster.exists()).await,
        "watched delete was not mirrored"
    );

    service.shutdown().await;
    assert_eq!(service.status().await.unwrap().get("movies"), Some(&false));
}

#[tokio::test]
async fn test_records_without_ids_get_stable_ids() {
    let temp_dir = TempDir::new().unwrap();
    let source = temp_dir.path().join("src");
    fs::create_dir_all(&source).unwrap();
    let records_path = temp_dir.path().join("records.yaml");
    fs::write(
        &records_path,
        format!(
            "records:\n  - source_folder: {}\n    target_folder: {}\n",
            source.display(),
            temp_dir.path().join("dst").display()
        ),
    )
    .unwrap();

    let service = MirrorService::from_config(&ServiceConfig::new(&records_path)).unwrap();
    let first: Vec<String> = service.status().await.unwrap().into_keys().collect();
    let second: Vec<String> = service.status().await.unwrap().into_keys().collect();
    assert_eq!(first.len(), 1);
    assert_eq!(first, second);

    let stored = YamlRecordStore::new(&records_path).load().unwrap();
    assert_eq!(stored[0].id, first[0]);

    let stats = service.sync_record(&first[0]).await.unwrap();
    assert_eq!(stats.changes(), 0);
    assert_eq!(stats.errors, 0);
}
