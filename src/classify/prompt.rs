//! Prompt templates sent to the inference service.
//!
//! The decision policy (which keywords make a mail a project or an engineer
//! posting) and the man-yen scaling of prices live here and nowhere else; the
//! answers are not re-validated locally.

/// Prompt asking for a `project` / `engineer` / `other` JSON object.
pub fn classification_prompt(subject: &str, body: &str) -> String {
    format!(
        r#"次のメールが「案件情報（要員募集）」か「人材情報（技術者紹介）」かを判定し、該当する形式のJSONだけを返してください。

【件名】
{subject}

【本文】
{body}

判定基準:
1. project: 開発案件への参画依頼、要員募集、案件概要、商流、単価の記載がある。キーワード: 案件, 募集, 要員, 相談
2. engineer: 特定の技術者（実名またはイニシャル）の紹介、スキルシート添付、稼働可能日、経験年数、単価の記載がある。キーワード: 人材, 紹介, 技術者, イニシャル, 稼働可
3. other: どちらにも当てはまらない。

projectの場合:
{{
  "type": "project",
  "location": "勤務地",
  "period": "期間",
  "price": 単価(万円単位の整数。100万なら100、70-80万なら80),
  "requiredSkills": "必須スキル",
  "senderName": "署名の担当者名",
  "senderCompany": "署名の会社名"
}}

engineerの場合:
{{
  "type": "engineer",
  "engineerName": "技術者名またはイニシャル",
  "mainSkills": "主要スキル",
  "yearsOfExperience": 経験年数(整数、不明なら0),
  "monthlyRate": 希望単価(万円単位の整数。80万なら80、800,000円も80),
  "availableFrom": "稼働開始可能日",
  "gender": "性別",
  "age": 年齢(整数),
  "nearestStation": "最寄駅",
  "senderName": "署名の営業担当者名",
  "senderCompany": "署名の会社名"
}}

otherの場合:
{{
  "type": "other",
  "senderName": "署名の送信者名",
  "senderCompany": "署名の会社名"
}}

ルール:
- JSONのみを出力し、説明やコメントは付けない
- 数値項目は単位や記号を除いた整数
- 不明な項目は空文字("")または0
- senderNameとsenderCompanyはメール末尾の署名から取る
- 案件と人材が混在する場合は主要な方（同程度なら先に書かれている方）を選ぶ"#
    )
}

/// Prompt asking for the skills listed in a spreadsheet, as rendered by
/// [`crate::attachment::spreadsheet::sheet_text`].
pub fn skill_prompt(sheet_text: &str) -> String {
    format!(
        r#"以下のExcelデータから技術者のスキル情報をすべて抽出してください。

{sheet_text}

出力形式:
{{
  "excel_skills": ["スキル1", "スキル2"],
  "additional_info": {{
    "certifications": ["資格1"],
    "projects": ["プロジェクト1"],
    "other": "その他の有用な情報"
  }}
}}

ルール:
- excel_skillsは配列
- 言語、フレームワーク、ツール、技術をすべて含める
- 重複は除く
- JSONのみを出力する"#
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classification_prompt_embeds_message() {
        let p = classification_prompt("急募：Java案件", "本文です");
        assert!(p.contains("【件名】\n急募：Java案件"));
        assert!(p.contains("本文です"));
        assert!(p.contains("\"type\": \"engineer\""));
    }

    #[test]
    fn test_skill_prompt_embeds_sheet() {
        let p = skill_prompt("氏名 | A.K\nJava | 5年");
        assert!(p.contains("Java | 5年"));
        assert!(p.contains("\"excel_skills\""));
    }
}
