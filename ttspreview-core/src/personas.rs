//! Catalogue of the voices a Kokoro server ships with

use serde::{Deserialize, Serialize};

#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
    strum::VariantArray,
)]
#[strum(ascii_case_insensitive)]
pub enum Language {
    #[strum(to_string = "American English", serialize = "american-english")]
    AmericanEnglish,
    #[strum(to_string = "British English", serialize = "british-english")]
    BritishEnglish,
    #[strum(to_string = "Japanese")]
    Japanese,
    #[strum(to_string = "Mandarin Chinese", serialize = "mandarin-chinese")]
    MandarinChinese,
    #[strum(to_string = "Spanish")]
    Spanish,
    #[strum(to_string = "French")]
    French,
    #[strum(to_string = "Hindi")]
    Hindi,
    #[strum(to_string = "Italian")]
    Italian,
    #[strum(to_string = "Brazilian Portuguese", serialize = "brazilian-portuguese")]
    BrazilianPortuguese,
}

#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
    strum::VariantArray,
)]
#[strum(ascii_case_insensitive)]
pub enum Sex {
    Female,
    Male,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Persona {
    /// Identifier the server expects, e.g. `af_heart`
    pub id: &'static str,
    pub language: Language,
    pub sex: Sex,
    pub name: &'static str,
}

impl Persona {
    /// "Heart (American English, Female)"
    pub fn label(&self) -> String {
        format!("{} ({}, {})", self.name, self.language, self.sex)
    }
}

macro_rules! personas {
    ($(($id:literal, $language:ident, $sex:ident, $name:literal)),* $(,)?) => {
        &[$(Persona {
            id: $id,
            language: Language::$language,
            sex: Sex::$sex,
            name: $name,
        }),*]
    };
}

pub static PERSONAS: &[Persona] = personas![
    ("af_heart", AmericanEnglish, Female, "Heart"),
    ("af_alloy", AmericanEnglish, Female, "Alloy"),
    ("af_aoede", AmericanEnglish, Female, "Aoede"),
    ("af_bella", AmericanEnglish, Female, "Bella"),
    ("af_jessica", AmericanEnglish, Female, "Jessica"),
    ("af_kore", AmericanEnglish, Female, "Kore"),
    ("af_nicole", AmericanEnglish, Female, "Nicole"),
    ("af_nova", AmericanEnglish, Female, "Nova"),
    ("af_river", AmericanEnglish, Female, "River"),
    ("af_sarah", AmericanEnglish, Female, "Sarah"),
    ("af_sky", AmericanEnglish, Female, "Sky"),
    ("am_adam", AmericanEnglish, Male, "Adam"),
    ("am_echo", AmericanEnglish, Male, "Echo"),
    ("am_eric", AmericanEnglish, Male, "Eric"),
    ("am_fenrir", AmericanEnglish, Male, "Fenrir"),
    ("am_liam", AmericanEnglish, Male, "Liam"),
    ("am_michael", AmericanEnglish, Male, "Michael"),
    ("am_onyx", AmericanEnglish, Male, "Onyx"),
    ("am_puck", AmericanEnglish, Male, "Puck"),
    ("am_santa", AmericanEnglish, Male, "Santa"),
    ("bf_alice", BritishEnglish, Female, "Alice"),
    ("bf_emma", BritishEnglish, Female, "Emma"),
    ("bf_isabella", BritishEnglish, Female, "Isabella"),
    ("bf_lily", BritishEnglish, Female, "Lily"),
    ("bm_daniel", BritishEnglish, Male, "Daniel"),
    ("bm_fable", BritishEnglish, Male, "Fable"),
    ("bm_george", BritishEnglish, Male, "George"),
    ("bm_lewis", BritishEnglish, Male, "Lewis"),
    ("jf_alpha", Japanese, Female, "Alpha"),
    ("jf_gongitsune", Japanese, Female, "Gongitsune"),
    ("jf_nezumi", Japanese, Female, "Nezumi"),
    ("jf_tebukuro", Japanese, Female, "Tebukuro"),
    ("jm_kumo", Japanese, Male, "Kumo"),
    ("zf_xiaobei", MandarinChinese, Female, "Xiaobei"),
    ("zf_xiaoni", MandarinChinese, Female, "Xiaoni"),
    ("zf_xiaoxiao", MandarinChinese, Female, "Xiaoxiao"),
    ("zf_xiaoyi", MandarinChinese, Female, "Xiaoyi"),
    ("zm_yunjian", MandarinChinese, Male, "Yunjian"),
    ("zm_yunxi", MandarinChinese, Male, "Yunxi"),
    ("zm_yunxia", MandarinChinese, Male, "Yunxia"),
    ("zm_yunyang", MandarinChinese, Male, "Yunyang"),
    ("ef_dora", Spanish, Female, "Dora"),
    ("em_alex", Spanish, Male, "Alex"),
    ("em_santa", Spanish, Male, "Santa"),
    ("ff_siwis", French, Female, "Siwis"),
    ("hf_alpha", Hindi, Female, "Alpha"),
    ("hf_beta", Hindi, Female, "Beta"),
    ("hm_omega", Hindi, Male, "Omega"),
    ("hm_psi", Hindi, Male, "Psi"),
    ("if_sara", Italian, Female, "Sara"),
    ("im_nicola", Italian, Male, "Nicola"),
    ("pf_dora", BrazilianPortuguese, Female, "Dora"),
    ("pm_alex", BrazilianPortuguese, Male, "Alex"),
    ("pm_santa", BrazilianPortuguese, Male, "Santa"),
];

pub fn find(id: &str) -> Option<&'static Persona> {
    PERSONAS.iter().find(|p| p.id == id)
}

/// Personas matching both filters; `None` matches everything
pub fn filter(language: Option<Language>, sex: Option<Sex>) -> Vec<&'static Persona> {
    PERSONAS
        .iter()
        .filter(|p| language.map_or(true, |l| p.language == l))
        .filter(|p| sex.map_or(true, |s| p.sex == s))
        .collect()
}
