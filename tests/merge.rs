use std::path::{Path, PathBuf};
use std::process::{Command, Output};

use lopdf::content::Content;
use lopdf::{Document, Object};

fn tmp_dir(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("img2pdf_test_{}", name));
    let _ = std::fs::remove_dir_all(&dir);
    std::fs::create_dir_all(&dir).unwrap();
    dir
}

fn run(args: &[&str], dirs: &[&Path]) -> Output {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_img2pdf"));
    cmd.args(args);
    for dir in dirs {
        cmd.arg(dir);
    }
    cmd.output().expect("failed to run img2pdf")
}

/// run img2pdf and panic unless it succeeds
fn run_ok(args: &[&str], dirs: &[&Path]) {
    let output = run(args, dirs);
    if !output.status.success() {
        panic!(
            "img2pdf failed:\nstdout: {}\nstderr: {}",
            String::from_utf8_lossy(&output.stdout),
            String::from_utf8_lossy(&output.stderr),
        );
    }
}

fn write_jpeg(path: &Path, width: u32, height: u32) {
    image::RgbImage::from_fn(width, height, |x, y| {
        image::Rgb([(x % 256) as u8, (y % 256) as u8, 128])
    })
    .save(path)
    .unwrap();
}

fn write_png(path: &Path, width: u32, height: u32) {
    image::RgbImage::from_fn(width, height, |x, y| {
        image::Rgb([(y % 256) as u8, (x % 256) as u8, 200])
    })
    .save(path)
    .unwrap();
}

fn write_png_rgba(path: &Path, width: u32, height: u32) {
    image::RgbaImage::from_fn(width, height, |x, y| {
        image::Rgba([(x % 256) as u8, (y % 256) as u8, 100, 200])
    })
    .save(path)
    .unwrap();
}

fn floats(objects: &[Object]) -> Vec<f32> {
    objects.iter().map(|o| o.as_float().unwrap()).collect()
}

/// (media box, cm operands) for each page in order
fn page_layouts(doc: &Document) -> Vec<(Vec<f32>, Vec<f32>)> {
    doc.get_pages()
        .values()
        .map(|&page_id| {
            let page = doc.get_dictionary(page_id).unwrap();
            let media_box = floats(page.get(b"MediaBox").unwrap().as_array().unwrap());
            let content = Content::decode(&doc.get_page_content(page_id).unwrap()).unwrap();
            let cm = content
                .operations
                .iter()
                .find(|op| op.operator == "cm")
                .expect("no cm operator");
            (media_box, floats(&cm.operands))
        })
        .collect()
}

fn assert_close(actual: &[f32], expected: &[f32]) {
    assert_eq!(actual.len(), expected.len(), "{:?} vs {:?}", actual, expected);
    for (a, e) in actual.iter().zip(expected) {
        assert!((a - e).abs() < 0.01, "{:?} vs {:?}", actual, expected);
    }
}

fn first_image_dict(doc: &Document) -> lopdf::Dictionary {
    let page_id = *doc.get_pages().values().next().expect("no pages");
    let page = doc.get_dictionary(page_id).unwrap();
    let (_, resources) = doc.dereference(page.get(b"Resources").unwrap()).unwrap();
    let xobjects = resources.as_dict().unwrap().get(b"XObject").unwrap();
    let (_, xobjects) = doc.dereference(xobjects).unwrap();
    let (_, im0) = doc
        .dereference(xobjects.as_dict().unwrap().get(b"Im0").unwrap())
        .unwrap();
    match im0 {
        Object::Stream(stream) => stream.dict.clone(),
        _ => panic!("Im0 is not a stream"),
    }
}

#[test]
fn test_a4_fit_and_center() {
    let root = tmp_dir("a4");
    let photos = root.join("photos");
    std::fs::create_dir_all(&photos).unwrap();
    write_jpeg(&photos.join("001.jpg"), 200, 300);
    write_png(&photos.join("002.png"), 300, 200);

    run_ok(&[], &[&photos]);

    let doc = Document::load(root.join("photos.pdf")).unwrap();
    let pages = page_layouts(&doc);
    assert_eq!(pages.len(), 2);

    // portrait image clamps on height and is centered horizontally
    assert_close(&pages[0].0, &[0.0, 0.0, 595.0, 842.0]);
    assert_close(&pages[0].1, &[561.33, 0.0, 0.0, 842.0, 16.83, 0.0]);

    // landscape image clamps on width and is centered vertically
    assert_close(&pages[1].0, &[0.0, 0.0, 595.0, 842.0]);
    assert_close(&pages[1].1, &[595.0, 0.0, 0.0, 396.67, 0.0, 222.67]);
}

#[test]
fn test_free_mode_uses_image_size() {
    let root = tmp_dir("free");
    let dir = root.join("scan");
    std::fs::create_dir_all(&dir).unwrap();
    write_png(&dir.join("page.png"), 800, 600);

    run_ok(&["--free", "--size", "XX", "--landscape"], &[&dir]);

    let doc = Document::load(root.join("scan.pdf")).unwrap();
    let pages = page_layouts(&doc);
    assert_eq!(pages.len(), 1);
    assert_close(&pages[0].0, &[0.0, 0.0, 800.0, 600.0]);
    assert_close(&pages[0].1, &[800.0, 0.0, 0.0, 600.0, 0.0, 0.0]);
}

#[test]
fn test_free_mode_pages_vary_per_image() {
    let root = tmp_dir("free_vary");
    let dir = root.join("mixed");
    std::fs::create_dir_all(&dir).unwrap();
    write_jpeg(&dir.join("a.jpg"), 120, 80);
    write_png(&dir.join("b.png"), 50, 90);

    run_ok(&["-f"], &[&dir]);

    let doc = Document::load(root.join("mixed.pdf")).unwrap();
    let pages = page_layouts(&doc);
    assert_close(&pages[0].0, &[0.0, 0.0, 120.0, 80.0]);
    assert_close(&pages[1].0, &[0.0, 0.0, 50.0, 90.0]);
}

#[test]
fn test_unsupported_size_fails_without_output() {
    let root = tmp_dir("bad_size");
    let dir = root.join("pages");
    std::fs::create_dir_all(&dir).unwrap();
    write_png(&dir.join("001.png"), 10, 10);

    let output = run(&["--size", "XX"], &[&dir]);
    assert_eq!(output.status.code(), Some(1));
    assert!(String::from_utf8_lossy(&output.stderr).contains("unsupported page size"));
    assert!(!root.join("pages.pdf").exists());
}

#[test]
fn test_explicit_size_with_landscape() {
    let root = tmp_dir("explicit");
    let dir = root.join("custom");
    std::fs::create_dir_all(&dir).unwrap();
    write_png(&dir.join("001.png"), 100, 100);

    run_ok(&["-s", "XX", "-w", "200", "-e", "400", "-l"], &[&dir]);

    let doc = Document::load(root.join("custom.pdf")).unwrap();
    let pages = page_layouts(&doc);
    assert_close(&pages[0].0, &[0.0, 0.0, 400.0, 200.0]);
    assert_close(&pages[0].1, &[200.0, 0.0, 0.0, 200.0, 100.0, 0.0]);
}

#[test]
fn test_named_size_landscape() {
    let root = tmp_dir("a3_landscape");
    let dir = root.join("wide");
    std::fs::create_dir_all(&dir).unwrap();
    write_png(&dir.join("001.png"), 100, 100);

    run_ok(&["-s", "A3", "-l"], &[&dir]);

    let doc = Document::load(root.join("wide.pdf")).unwrap();
    let pages = page_layouts(&doc);
    assert_close(&pages[0].0, &[0.0, 0.0, 1190.0, 842.0]);
}

#[test]
fn test_skips_other_files_and_sub_directories() {
    let root = tmp_dir("filter");
    let dir = root.join("album");
    let nested = dir.join("nested");
    std::fs::create_dir_all(&nested).unwrap();
    write_jpeg(&dir.join("b.JPEG"), 10, 20);
    write_png(&dir.join("a.png"), 20, 10);
    write_png(&nested.join("c.png"), 10, 10);
    std::fs::write(dir.join("notes.txt"), b"not an image").unwrap();
    std::fs::write(dir.join("d.gif"), b"GIF89a").unwrap();

    run_ok(&[], &[&dir]);

    let doc = Document::load(root.join("album.pdf")).unwrap();
    let pages = page_layouts(&doc);
    assert_eq!(pages.len(), 2);
    // a.png (landscape) first, then b.JPEG (portrait)
    assert_close(&pages[0].1[..1], &[595.0]);
    assert_close(&pages[1].1[3..4], &[842.0]);
    assert!(!dir.join("nested.pdf").exists());
}

#[test]
fn test_embedded_image_formats() {
    let root = tmp_dir("formats");
    for name in ["jpeg", "png", "rgba"] {
        std::fs::create_dir_all(root.join(name)).unwrap();
    }
    write_jpeg(&root.join("jpeg").join("001.jpg"), 4, 4);
    write_png(&root.join("png").join("001.png"), 4, 4);
    write_png_rgba(&root.join("rgba").join("001.png"), 4, 4);
    run_ok(&[], &[&root.join("jpeg"), &root.join("png"), &root.join("rgba")]);

    let doc = Document::load(root.join("jpeg.pdf")).unwrap();
    let dict = first_image_dict(&doc);
    assert_eq!(dict.get(b"Filter").unwrap().as_name_str().unwrap(), "DCTDecode");

    let doc = Document::load(root.join("png.pdf")).unwrap();
    let dict = first_image_dict(&doc);
    assert_eq!(dict.get(b"Filter").unwrap().as_name_str().unwrap(), "FlateDecode");
    assert!(dict.get(b"DecodeParms").is_ok());

    let doc = Document::load(root.join("rgba.pdf")).unwrap();
    let dict = first_image_dict(&doc);
    assert!(dict.get(b"SMask").is_ok(), "alpha should become an SMask");
}

#[test]
fn test_document_title_is_directory_name() {
    let root = tmp_dir("title");
    let dir = root.join("holiday");
    std::fs::create_dir_all(&dir).unwrap();
    write_png(&dir.join("1.png"), 4, 4);

    run_ok(&[], &[&dir]);

    let doc = Document::load(root.join("holiday.pdf")).unwrap();
    let (_, info) = doc.dereference(doc.trailer.get(b"Info").unwrap()).unwrap();
    let title = info.as_dict().unwrap().get(b"Title").unwrap();
    assert_eq!(title.as_str().unwrap(), b"holiday");
}

#[test]
fn test_corrupt_image_aborts_job() {
    let root = tmp_dir("corrupt");
    let dir = root.join("broken");
    std::fs::create_dir_all(&dir).unwrap();
    write_png(&dir.join("001.png"), 4, 4);
    std::fs::write(dir.join("002.jpg"), b"this is not a jpeg").unwrap();

    let output = run(&[], &[&dir]);
    assert_eq!(output.status.code(), Some(1));
    assert!(!root.join("broken.pdf").exists());
}

#[test]
fn test_truncated_jpeg_aborts_job() {
    let root = tmp_dir("truncated");
    let dir = root.join("scans");
    std::fs::create_dir_all(&dir).unwrap();
    write_png(&dir.join("001.png"), 4, 4);
    let cut = dir.join("002.jpg");
    write_jpeg(&cut, 64, 64);
    let data = std::fs::read(&cut).unwrap();
    // keep the frame header, drop the scan
    let sos = data.windows(2).position(|w| w == [0xFF, 0xDA]).unwrap();
    std::fs::write(&cut, &data[..sos]).unwrap();

    let output = run(&[], &[&dir]);
    assert_eq!(output.status.code(), Some(1));
    assert!(String::from_utf8_lossy(&output.stderr).contains("cannot decode image"));
    assert!(!root.join("scans.pdf").exists());
}

#[test]
fn test_zero_sized_image_aborts_job() {
    let root = tmp_dir("zero_size");
    let dir = root.join("flat");
    std::fs::create_dir_all(&dir).unwrap();
    // SOF0 with height 0 and width 10
    let mut jpeg = vec![0xFF, 0xD8, 0xFF, 0xC0, 0x00, 0x11, 8, 0, 0, 0, 10, 3];
    for i in 1..=3u8 {
        jpeg.extend_from_slice(&[i, 0x11, 0]);
    }
    jpeg.extend_from_slice(&[0xFF, 0xD9]);
    std::fs::write(dir.join("001.jpg"), jpeg).unwrap();

    let output = run(&[], &[&dir]);
    assert_eq!(output.status.code(), Some(1));
    assert!(String::from_utf8_lossy(&output.stderr).contains("zero width or height"));
    assert!(!root.join("flat.pdf").exists());
}

#[test]
fn test_empty_directory_writes_empty_document() {
    let root = tmp_dir("empty");
    let dir = root.join("blank");
    std::fs::create_dir_all(&dir).unwrap();
    std::fs::write(dir.join("readme.txt"), b"no images here").unwrap();
    std::fs::write(root.join("blank.pdf"), b"stale").unwrap();

    run_ok(&[], &[&dir]);

    let doc = Document::load(root.join("blank.pdf")).unwrap();
    assert!(doc.get_pages().is_empty());
}

#[test]
fn test_missing_directory_fails() {
    let root = tmp_dir("missing");
    let output = run(&[], &[&root.join("nope")]);
    assert_eq!(output.status.code(), Some(1));
}

#[test]
fn test_no_arguments_is_noop() {
    let output = run(&[], &[]);
    assert!(output.status.success());
}

#[test]
fn test_existing_output_is_overwritten() {
    let root = tmp_dir("overwrite");
    let dir = root.join("doc");
    std::fs::create_dir_all(&dir).unwrap();
    write_png(&dir.join("1.png"), 4, 4);
    std::fs::write(root.join("doc.pdf"), b"stale").unwrap();

    run_ok(&[], &[&dir]);

    let doc = Document::load(root.join("doc.pdf")).unwrap();
    assert_eq!(doc.get_pages().len(), 1);
    assert!(!root.join(".doc.pdf.tmp").exists());
}

#[test]
fn test_multiple_directories() {
    let root = tmp_dir("multi_args");
    let first = root.join("first");
    let second = root.join("second");
    std::fs::create_dir_all(&first).unwrap();
    std::fs::create_dir_all(&second).unwrap();
    write_png(&first.join("1.png"), 4, 4);
    write_png(&second.join("1.png"), 4, 4);
    write_png(&second.join("2.png"), 4, 4);

    run_ok(&[], &[&first, &second]);

    assert_eq!(Document::load(root.join("first.pdf")).unwrap().get_pages().len(), 1);
    assert_eq!(Document::load(root.join("second.pdf")).unwrap().get_pages().len(), 2);
}

fn make_batch(name: &str) -> PathBuf {
    let root = tmp_dir(name);
    let parent = root.join("volumes");
    for (sub, count) in [("vol1", 1), ("vol2", 3)] {
        let dir = parent.join(sub);
        std::fs::create_dir_all(dir.join("extras")).unwrap();
        for i in 0..count {
            write_png(&dir.join(format!("{:03}.png", i)), 6, 4);
        }
        write_png(&dir.join("extras").join("x.png"), 4, 4);
    }
    write_png(&parent.join("loose.png"), 4, 4);
    parent
}

#[test]
fn test_batch_mode() {
    let parent = make_batch("batch");
    run_ok(&["--batch"], &[&parent]);

    let doc = Document::load(parent.join("vol1.pdf")).unwrap();
    assert_eq!(doc.get_pages().len(), 1);
    let doc = Document::load(parent.join("vol2.pdf")).unwrap();
    assert_eq!(doc.get_pages().len(), 3);

    // only one level deep, loose files ignored
    assert!(!parent.join("vol1").join("extras.pdf").exists());
    assert!(!parent.with_file_name("volumes.pdf").exists());
}

#[test]
fn test_batch_mode_parallel() {
    let parent = make_batch("batch_parallel");
    run_ok(&["-b", "-j", "4"], &[&parent]);

    assert_eq!(Document::load(parent.join("vol1.pdf")).unwrap().get_pages().len(), 1);
    assert_eq!(Document::load(parent.join("vol2.pdf")).unwrap().get_pages().len(), 3);
}

#[test]
fn test_batch_mode_fails_fast() {
    let root = tmp_dir("batch_fail");
    let parent = root.join("jobs");
    for sub in ["a", "b", "c"] {
        let dir = parent.join(sub);
        std::fs::create_dir_all(&dir).unwrap();
        write_png(&dir.join("1.png"), 4, 4);
    }
    std::fs::write(parent.join("b").join("2.png"), b"corrupt").unwrap();

    let output = run(&["-b"], &[&parent]);
    assert_eq!(output.status.code(), Some(1));
    assert!(parent.join("a.pdf").exists());
    assert!(!parent.join("b.pdf").exists());
    assert!(!parent.join("c.pdf").exists());
}

#[test]
fn test_parallel_batch_fails() {
    let root = tmp_dir("batch_fail_parallel");
    let parent = root.join("jobs");
    for sub in ["a", "b", "c"] {
        let dir = parent.join(sub);
        std::fs::create_dir_all(&dir).unwrap();
        write_png(&dir.join("1.png"), 4, 4);
    }
    std::fs::write(parent.join("b").join("2.png"), b"corrupt").unwrap();

    let output = run(&["-b", "-j", "3"], &[&parent]);
    assert_eq!(output.status.code(), Some(1));
    assert!(!parent.join("b.pdf").exists());
}
