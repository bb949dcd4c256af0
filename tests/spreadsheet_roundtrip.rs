use club_relay_bot::catalog::{load_ranked_source, Catalog};
use club_relay_bot::scrape::{write_report, AdminActivity, AdminLink, ClubReport, ACTIVITY_COLUMN};

type TestResult = Result<(), Box<dyn std::error::Error>>;

fn report(club: &str, flags: &[bool]) -> ClubReport {
    ClubReport {
        club_url: format!("https://lichess.org/team/{club}"),
        admins: flags
            .iter()
            .enumerate()
            .map(|(i, active)| AdminActivity {
                link: AdminLink {
                    url: format!("https://lichess.org/@/{club}-admin{i}"),
                    name: format!("{club}-admin{i}"),
                },
                active: *active,
            })
            .collect(),
    }
}

#[test]
fn test_scraper_output_feeds_the_catalog() -> TestResult {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("lichess_club_admins.xlsx");

    let reports = vec![
        report("quiet", &[false, false]),
        report("busy", &[true, true, false, true]),
        report("solo", &[true]),
        // Only the first ten admins are written and counted
        report("crowded", &[true; 12]),
    ];
    write_report(&path, &reports)?;

    let entries = load_ranked_source(&path, usize::from(ACTIVITY_COLUMN))?;
    let weights: Vec<(String, i64)> = entries
        .iter()
        .map(|e| (e.identity.clone(), e.weight))
        .collect();
    assert_eq!(
        weights,
        [
            ("https://lichess.org/team/quiet".to_string(), 0),
            ("https://lichess.org/team/busy".to_string(), 3),
            ("https://lichess.org/team/solo".to_string(), 1),
            ("https://lichess.org/team/crowded".to_string(), 10),
        ]
    );

    let catalog = Catalog::build(entries);
    let order: Vec<&str> = catalog
        .groups()
        .iter()
        .map(|g| g.members[0].identity.as_str())
        .collect();
    assert_eq!(
        order,
        [
            "https://lichess.org/team/crowded",
            "https://lichess.org/team/busy",
            "https://lichess.org/team/solo",
            "https://lichess.org/team/quiet",
        ]
    );
    Ok(())
}

#[test]
fn test_missing_spreadsheet_is_an_error() -> TestResult {
    let dir = tempfile::tempdir()?;
    assert!(load_ranked_source(&dir.path().join("absent.xlsx"), 31).is_err());
    Ok(())
}
