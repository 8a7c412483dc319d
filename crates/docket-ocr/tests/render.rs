//! `pdftoppm` invocation against stand-in scripts.
#![cfg(unix)]

use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use docket::PageIdx;
use docket_ocr::render::PNG_SIGNATURE;
use docket_ocr::{OcrError, PdftoppmRasterizer, Rasterizer};

fn write_script(dir: &Path, name: &str, body: &str) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
    let mut perms = std::fs::metadata(&path).unwrap().permissions();
    perms.set_mode(0o755);
    std::fs::set_permissions(&path, perms).unwrap();
    path
}

// One test so the scripts are never written while another test forks.
#[tokio::test]
async fn test_pdftoppm_invocation() {
    let dir = tempfile::tempdir().unwrap();
    let pdf = dir.path().join("doc.pdf");
    std::fs::write(&pdf, b"%PDF-1.7").unwrap();
    let args_log = dir.path().join("args.log");

    // $2 is the output prefix; the page number follows `-f`.
    let good = write_script(
        dir.path(),
        "fake-pdftoppm",
        &format!(
            "echo \"$@\" >> '{}'\nprintf '\\211PNG\\r\\n\\032\\npage-%s' \"$5\" > \"$2.png\"",
            args_log.display()
        ),
    );
    let rasterizer = PdftoppmRasterizer::new(good.display().to_string(), 150);
    let pages = rasterizer
        .render(&pdf, &[PageIdx::new(2), PageIdx::new(0), PageIdx::new(2)])
        .await
        .unwrap();

    assert_eq!(
        pages.iter().map(|p| p.page_idx).collect::<Vec<_>>(),
        vec![PageIdx::new(0), PageIdx::new(2)]
    );
    assert!(pages[0].png.starts_with(&PNG_SIGNATURE));
    assert!(pages[0].png.ends_with(b"page-1"));
    assert!(pages[1].png.ends_with(b"page-3"));
    assert_ne!(pages[0].png_sha, pages[1].png_sha);

    let log = std::fs::read_to_string(&args_log).unwrap();
    let lines: Vec<&str> = log.lines().collect();
    assert_eq!(lines.len(), 2);
    assert!(lines[0].contains("-png -f 1 -l 1 -singlefile -rx 150 -ry 150"));
    assert!(lines[0].contains("p0000"));
    assert!(lines[1].contains("p0002"));

    let single = rasterizer.render_page(&pdf, PageIdx::new(4)).await.unwrap();
    assert_eq!(single.page_idx, PageIdx::new(4));

    let bogus = write_script(
        dir.path(),
        "bogus-pdftoppm",
        "printf 'not a png' > \"$2.png\"",
    );
    let err = PdftoppmRasterizer::new(bogus.display().to_string(), 300)
        .render(&pdf, &[PageIdx::new(0)])
        .await
        .unwrap_err();
    assert!(matches!(err, OcrError::InvalidImage { page: 1 }));

    let failing = write_script(dir.path(), "failing-pdftoppm", "echo boom >&2\nexit 3");
    let err = PdftoppmRasterizer::new(failing.display().to_string(), 300)
        .render(&pdf, &[PageIdx::new(0)])
        .await
        .unwrap_err();
    match err {
        OcrError::RenderFailed { page, message } => {
            assert_eq!(page, 1);
            assert_eq!(message, "boom");
        }
        other => panic!("unexpected error: {other}"),
    }
}
