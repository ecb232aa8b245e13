//! Seed rows for a fresh install with no reachable backend.
//!
//! Ids are deterministic (`sample_<table>_<n>`) so seeding twice, or on two
//! devices, produces the same records.

use chrono::{Datelike, NaiveDate, Weekday};

use crate::model::{encode, Announcement, Employee, Medicine, Record, SalesStatus, Shift, Table};

const STAFF: [&str; 4] = ["山田 太郎", "佐藤 花子", "鈴木 一郎", "田中 美咲"];
const PART_TIMER: &str = "鈴木 一郎";
const SHIFT_TYPES: [(&str, &str, &str); 4] = [
    ("早番", "08:30", "17:00"),
    ("日勤", "09:00", "18:00"),
    ("遅番", "10:00", "19:00"),
    ("全日", "08:30", "19:00"),
];

/// Sample rows for `table`. Shifts cover weekdays 1 to 28 of the month
/// containing `today`; `now` stamps `created_at`/`updated_at`.
pub fn sample_records(table: Table, today: NaiveDate, now: &str) -> Vec<Record> {
    let id = |n: usize| format!("sample_{}_{}", table, n + 1);
    let rows: Vec<serde_json::Result<Record>> = match table {
        Table::Medicines => medicines()
            .into_iter()
            .enumerate()
            .map(|(n, m)| {
                encode(&Medicine {
                    id: id(n),
                    created_at: now.to_string(),
                    updated_at: now.to_string(),
                    ..m
                })
            })
            .collect(),
        Table::Employees => employees()
            .into_iter()
            .enumerate()
            .map(|(n, e)| {
                encode(&Employee {
                    id: id(n),
                    created_at: now.to_string(),
                    updated_at: now.to_string(),
                    ..e
                })
            })
            .collect(),
        Table::Announcements => announcements()
            .into_iter()
            .enumerate()
            .map(|(n, a)| {
                encode(&Announcement {
                    id: id(n),
                    created_at: now.to_string(),
                    updated_at: now.to_string(),
                    ..a
                })
            })
            .collect(),
        Table::Shifts => shifts(today)
            .into_iter()
            .enumerate()
            .map(|(n, s)| {
                encode(&Shift {
                    id: id(n),
                    created_at: now.to_string(),
                    updated_at: now.to_string(),
                    ..s
                })
            })
            .collect(),
    };

    rows.into_iter()
        .filter_map(|row| match row {
            Ok(record) => Some(record),
            Err(e) => {
                tracing::warn!("Skipping sample {} row: {}", table, e);
                None
            }
        })
        .collect()
}

fn medicine(
    name: &str,
    generic_name: &str,
    category: &str,
    sales_status: SalesStatus,
    notes: &str,
    is_favorite: bool,
) -> Medicine {
    Medicine {
        name: name.to_string(),
        generic_name: generic_name.to_string(),
        category: category.to_string(),
        sales_status,
        notes: notes.to_string(),
        is_favorite,
        ..Medicine::default()
    }
}

fn medicines() -> Vec<Medicine> {
    vec![
        medicine("ロキソプロフェンNa錠60mg", "ロキソプロフェンナトリウム水和物", "内服薬", SalesStatus::Other, "解熱鎮痛消炎剤。食後服用。", true),
        medicine("アムロジピンOD錠5mg", "アムロジピンベシル酸塩", "内服薬", SalesStatus::Other, "Ca拮抗薬。高血圧症・狭心症に使用。", true),
        Medicine {
            alternative_medicine: "メトホルミン塩酸塩錠250mg「YY」".to_string(),
            supply_info: "2026年1月より出荷調整中。代替品への切替を推奨。".to_string(),
            ..medicine("メトホルミン塩酸塩錠250mg「XX」", "メトホルミン塩酸塩", "内服薬", SalesStatus::SupplyRestricted, "ビグアナイド系糖尿病治療薬", false)
        },
        Medicine {
            discontinuation_date: "2025年12月31日".to_string(),
            alternative_medicine: "モサプリドクエン酸塩錠5mg「サワイ」".to_string(),
            ..medicine("ガスモチン錠5mg", "モサプリドクエン酸塩水和物", "内服薬", SalesStatus::Discontinued, "消化管運動促進薬。先発品販売中止。", false)
        },
        medicine("ヒルドイドソフト軟膏0.3%", "ヘパリン類似物質", "外用薬", SalesStatus::Other, "保湿・血行促進。皮脂欠乏症に使用。", true),
        medicine("ツムラ葛根湯エキス顆粒（医療用）", "葛根湯", "漢方薬", SalesStatus::Other, "感冒の初期、肩こりなどに使用。", false),
        medicine("リンデロンVG軟膏0.12%", "ベタメタゾン吉草酸エステル・ゲンタマイシン硫酸塩", "外用薬", SalesStatus::Other, "ステロイド＋抗生物質配合外用薬", false),
        medicine("セレコキシブ錠100mg「サワイ」", "セレコキシブ", "内服薬", SalesStatus::NewlyAdopted, "COX-2選択的阻害薬。2026年2月より採用。", false),
    ]
}

#[allow(clippy::too_many_arguments)]
fn employee(
    name: &str,
    furigana: &str,
    position: &str,
    employment_type: &str,
    phone: &str,
    email: &str,
    hire_date: &str,
    notes: &str,
) -> Employee {
    Employee {
        name: name.to_string(),
        furigana: furigana.to_string(),
        position: position.to_string(),
        employment_type: employment_type.to_string(),
        phone: phone.to_string(),
        email: email.to_string(),
        hire_date: hire_date.to_string(),
        status: "在籍".to_string(),
        notes: notes.to_string(),
        ..Employee::default()
    }
}

fn employees() -> Vec<Employee> {
    vec![
        employee("山田 太郎", "やまだ たろう", "管理薬剤師", "正社員", "090-1234-5678", "yamada@example.com", "2015-04-01", "管理薬剤師兼務"),
        employee("佐藤 花子", "さとう はなこ", "薬剤師", "正社員", "090-2345-6789", "sato@example.com", "2018-04-01", ""),
        employee("鈴木 一郎", "すずき いちろう", "薬剤師", "パート", "080-3456-7890", "", "2020-10-01", "月・水・金勤務"),
        employee("田中 美咲", "たなか みさき", "医療事務", "正社員", "090-4567-8901", "tanaka@example.com", "2021-04-01", ""),
    ]
}

fn announcement(title: &str, category: &str, priority: &str, author: &str, content: &str, date: &str) -> Announcement {
    Announcement {
        title: title.to_string(),
        content: content.to_string(),
        priority: priority.to_string(),
        date: date.to_string(),
        category: category.to_string(),
        author: author.to_string(),
        ..Announcement::default()
    }
}

fn announcements() -> Vec<Announcement> {
    vec![
        announcement(
            "ガスモチン錠5mg 販売中止のお知らせ",
            "業務連絡",
            "重要",
            "山田 太郎",
            "ガスモチン錠5mgが2025年12月31日をもって販売中止となりました。代替薬としてモサプリドクエン酸塩錠5mg「サワイ」への切替をお願いします。",
            "2026-01-15T09:00:00.000Z",
        ),
        announcement(
            "2月の調剤報酬改定研修について",
            "研修情報",
            "通常",
            "佐藤 花子",
            "2026年2月20日（金）18:00より、調剤報酬改定に関する研修を実施します。全スタッフ参加をお願いします。場所：薬局2階会議室。",
            "2026-02-01T10:00:00.000Z",
        ),
        announcement(
            "メトホルミン塩酸塩錠 出荷調整情報",
            "業務連絡",
            "緊急",
            "山田 太郎",
            "メトホルミン塩酸塩錠250mg「XX」が出荷調整中です。在庫が少なくなっています。代替品「YY」への切替を検討してください。",
            "2026-02-10T08:30:00.000Z",
        ),
    ]
}

/// Weekday rota: everyone daily except the part-timer (Mon/Wed/Fri), with
/// shift types rotating by day and staff position.
fn shifts(today: NaiveDate) -> Vec<Shift> {
    let mut shifts = Vec::new();
    for day in 1..=28u32 {
        let Some(date) = NaiveDate::from_ymd_opt(today.year(), today.month(), day) else {
            continue;
        };
        let weekday = date.weekday();
        if matches!(weekday, Weekday::Sat | Weekday::Sun) {
            continue;
        }
        for (idx, staff) in STAFF.iter().enumerate() {
            if *staff == PART_TIMER && !matches!(weekday, Weekday::Mon | Weekday::Wed | Weekday::Fri) {
                continue;
            }
            let (shift_type, start, end) = SHIFT_TYPES[(day as usize + idx) % SHIFT_TYPES.len()];
            shifts.push(Shift {
                staff_name: staff.to_string(),
                date: format!("{}T00:00:00.000Z", date.format("%Y-%m-%d")),
                shift_type: shift_type.to_string(),
                start_time: start.to_string(),
                end_time: end.to_string(),
                ..Shift::default()
            });
        }
    }
    shifts
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{decode, record_id};

    const NOW: &str = "2026-03-02T09:00:00.000Z";

    fn march() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 3, 15).unwrap()
    }

    #[test]
    fn test_sample_counts() {
        assert_eq!(sample_records(Table::Medicines, march(), NOW).len(), 8);
        assert_eq!(sample_records(Table::Employees, march(), NOW).len(), 4);
        assert_eq!(sample_records(Table::Announcements, march(), NOW).len(), 3);
    }

    #[test]
    fn test_sample_ids_deterministic() {
        let first = sample_records(Table::Medicines, march(), NOW);
        let second = sample_records(Table::Medicines, march(), NOW);
        assert_eq!(first, second);
        assert_eq!(record_id(&first[0]), Some("sample_medicines_1"));
        assert_eq!(first[0]["created_at"], first[0]["updated_at"]);
    }

    #[test]
    fn test_sample_shifts_skip_weekends() {
        // March 2026 starts on a Sunday
        let shifts = sample_records(Table::Shifts, march(), NOW);
        let mut expected = 0;
        for day in 1..=28 {
            let date = NaiveDate::from_ymd_opt(2026, 3, day).unwrap();
            match date.weekday() {
                Weekday::Sat | Weekday::Sun => {}
                Weekday::Mon | Weekday::Wed | Weekday::Fri => expected += 4,
                _ => expected += 3,
            }
        }
        assert_eq!(shifts.len(), expected);

        for record in &shifts {
            let shift: Shift = decode(record).unwrap();
            assert!(!shift.date.starts_with("2026-03-01"));
            assert_eq!(shift.start_time.len(), 5);
            if shift.staff_name == PART_TIMER {
                let date = NaiveDate::parse_from_str(&shift.date[..10], "%Y-%m-%d").unwrap();
                assert!(matches!(date.weekday(), Weekday::Mon | Weekday::Wed | Weekday::Fri));
            }
        }
    }

    #[test]
    fn test_sample_medicine_statuses() {
        let meds: Vec<Medicine> = sample_records(Table::Medicines, march(), NOW)
            .iter()
            .map(|r| decode(r).unwrap())
            .collect();
        assert_eq!(meds.iter().filter(|m| m.sales_status.needs_attention()).count(), 2);
        assert_eq!(meds.iter().filter(|m| m.is_favorite).count(), 3);
    }
}
