use serde::{Deserialize, Serialize};
use strum::{Display, EnumString, IntoStaticStr};

/// Grid region a generator unit or weather station belongs to
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    IntoStaticStr,
)]
#[strum(ascii_case_insensitive)]
pub enum Region {
    North,
    Central,
    South,
    East,
    Other,
}

impl Region {
    /// All regions in classification priority order
    pub const ALL: [Region; 5] = [
        Region::North,
        Region::Central,
        Region::South,
        Region::East,
        Region::Other,
    ];

    /// Regions that carry weather features in their model input
    pub const WEATHER: [Region; 4] = [Region::North, Region::Central, Region::South, Region::East];

    pub fn has_weather(&self) -> bool {
        !matches!(self, Region::Other)
    }

    /// Lower-case key used for per-region artifact file names
    pub fn file_key(&self) -> &'static str {
        match self {
            Region::North => "north",
            Region::Central => "central",
            Region::South => "south",
            Region::East => "east",
            Region::Other => "other",
        }
    }

    fn unit_keywords(&self) -> &'static [&'static str] {
        match self {
            Region::North => &[
                "林口", "大潭", "新桃", "通霄", "協和", "石門", "翡翠", "桂山", "觀音", "龍潭",
                "北部",
            ],
            Region::Central => &[
                "台中", "大甲溪", "明潭", "彰工", "中港", "竹南", "苗栗", "雲林", "麥寮", "中部",
                "彰",
            ],
            Region::South => &[
                "興達", "大林", "南部", "核三", "曾文", "嘉義", "台南", "高雄", "永安", "屏東",
            ],
            Region::East => &["和平", "花蓮", "蘭陽", "卑南", "立霧", "東部"],
            Region::Other => &[
                "汽電共生",
                "其他台電自有",
                "其他購電太陽能",
                "其他購電風力",
                "購買地熱",
                "台電自有地熱",
                "生質能",
            ],
        }
    }

    fn stations(&self) -> &'static [&'static str] {
        match self {
            Region::North => &[
                "基隆", "淡水", "新北", "新竹", "臺北", "新屋", "桃園農改", "文山茶改", "新埔工作站",
            ],
            Region::Central => &[
                "臺中", "梧棲", "後龍", "古坑", "彰師大", "麥寮", "田中", "日月潭", "苗栗農改",
            ],
            Region::South => &[
                "嘉義", "臺南", "高雄", "恆春", "永康", "臺南農改", "旗南農改", "高雄農改", "屏東",
            ],
            Region::East => &["宜蘭", "花蓮", "成功", "臺東", "大武"],
            Region::Other => &[],
        }
    }
}

/// Keyword-based mapping of raw unit and station names onto grid regions
pub struct RegionClassifier;

impl RegionClassifier {
    /// First region (in `Region::ALL` order) whose keyword occurs in the name wins.
    pub fn classify_unit(name: &str) -> Region {
        Region::ALL
            .into_iter()
            .find(|region| region.unit_keywords().iter().any(|kw| name.contains(kw)))
            .unwrap_or(Region::Other)
    }

    /// Exact station-name lookup; stations outside the configured set yield `None`.
    pub fn station_region(station: &str) -> Option<Region> {
        Region::WEATHER
            .into_iter()
            .find(|region| region.stations().contains(&station))
    }

    pub fn keywords(region: Region) -> &'static [&'static str] {
        region.unit_keywords()
    }
}
