//! A full run against a CSV file on disk.

mod common;

use std::io::Write as _;

use sheetmerge_lib::data::csv::CsvOptions;
use sheetmerge_lib::data::CsvSheet;
use sheetmerge_lib::merge::{run_merge, template_dir_of, MergeRun, RunOutcome};
use sheetmerge_lib::template::parse_template;

use common::{FakeConverter, RecordingMailer, ScriptedHost};

#[tokio::test]
async fn test_csv_run_appends_status_column_and_error_sidecar() {
    let dir = tempfile::tempdir().unwrap();
    let data_path = dir.path().join("contacts.csv");
    std::fs::write(
        &data_path,
        "Email;Name;Amount\na@b.com;Jo;$1,200.00\nbad;X;$5.00\n",
    )
    .unwrap();
    let template_path = dir.path().join("invoice.yml");
    let mut template_file = std::fs::File::create(&template_path).unwrap();
    write!(
        template_file,
        "subject: 'Invoice for [[Name]]'\nbody: '<p>You owe <b>[[Amount]]</b>.</p>'\nstyle: 'p {{ color: #333; }}'\n"
    )
    .unwrap();

    let template = parse_template(&template_path).unwrap();
    let sheet = CsvSheet::new(&data_path, CsvOptions::default());
    let errors_path = sheet.errors_path();
    let mut run = MergeRun::new(template, sheet).with_template_dir(template_dir_of(&template_path));

    let mailer = RecordingMailer::default();
    let converter = FakeConverter::default();
    let mut host = ScriptedHost::answering(true);
    let outcome = run_merge(&mut run, &mut host, &mailer, &converter)
        .await
        .unwrap();
    let RunOutcome::Completed(result) = outcome else {
        panic!("expected completion");
    };
    assert_eq!((result.sent, result.failed), (1, 1));

    let sent = mailer.sent.lock().unwrap();
    assert_eq!(sent[0].email.subject, "Invoice for Jo");
    let html = sent[0].email.html_body.as_deref().unwrap();
    assert!(html.contains("$1,200.00"), "got: {html}");
    assert!(html.contains("color"), "css should be inlined: {html}");
    assert_eq!(sent[0].email.text_body.trim(), "You owe $1,200.00.");

    let written = std::fs::read_to_string(&data_path).unwrap();
    let lines: Vec<&str> = written.lines().collect();
    assert_eq!(lines[0], "Email;Name;Amount;Email Status");
    assert!(lines[1].starts_with("a@b.com;Jo;$1,200.00;Email sent on "));
    assert_eq!(lines[2], "bad;X;$5.00;Error: Invalid or missing email address.");
    assert_eq!(std::fs::read_to_string(errors_path).unwrap(), "3\n");
}

#[tokio::test]
async fn test_csv_rerun_skips_processed_rows() {
    let dir = tempfile::tempdir().unwrap();
    let data_path = dir.path().join("list.csv");
    std::fs::write(
        &data_path,
        "Name,Email,Email Status\nJo,a@b.com,Email sent on 3/4/24 10:00 AM\nAl,c@d.com,\n",
    )
    .unwrap();
    let template = sheetmerge_lib::template::Template::new("Hi [[Name]]", "");

    let mut run = MergeRun::new(template, CsvSheet::new(&data_path, CsvOptions::default()));
    let mailer = RecordingMailer::default();
    let mut host = ScriptedHost::answering(true);
    run_merge(&mut run, &mut host, &mailer, &FakeConverter::default())
        .await
        .unwrap();

    assert_eq!(mailer.recipients(), vec!["c@d.com"]);
    let written = std::fs::read_to_string(&data_path).unwrap();
    let lines: Vec<&str> = written.lines().collect();
    assert_eq!(lines[0], "Name,Email,Email Status");
    assert_eq!(
        lines[1],
        "Jo,a@b.com,Skipped: Status already present ('Email sent on 3/4/24 10:00 AM')"
    );
    assert!(lines[2].starts_with("Al,c@d.com,Email sent on "));
}

#[tokio::test]
async fn test_csv_run_keeps_sheet_encoding() {
    let dir = tempfile::tempdir().unwrap();
    let data_path = dir.path().join("legacy.csv");
    std::fs::write(&data_path, b"Email,Name\n\na@b.com,Jos\xe9\n").unwrap();

    let template = sheetmerge_lib::template::Template::new("Hola [[Name]]", "");
    let mut run = MergeRun::new(template, CsvSheet::new(&data_path, CsvOptions::default()));
    let mailer = RecordingMailer::default();
    let mut host = ScriptedHost::answering(true);
    run_merge(&mut run, &mut host, &mailer, &FakeConverter::default())
        .await
        .unwrap();

    assert_eq!(mailer.subjects(), vec!["Hola José"]);
    let bytes = std::fs::read(&data_path).unwrap();
    assert!(bytes.starts_with(b"Email,Name,Email Status\na@b.com,Jos\xe9,Email sent on "));
    assert!(std::str::from_utf8(&bytes).is_err(), "file must stay Windows-1252");
}
