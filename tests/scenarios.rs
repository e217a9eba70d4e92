use happyzone::diff::{diff_zones, CorrectionKind};
use happyzone::rr::{parse_zone, Record, RrType};
use happyzone::services::abstracts::{Delegation, Origin, Server};
use happyzone::services::svcs::caa::CAAPolicy;
use happyzone::services::svcs::email::DKIMRecord;
use happyzone::services::{analyze_zone, Service, ServiceBody};
use happyzone::storage::migrations::{self, SCHEMA_VERSION};
use happyzone::storage::Domain;
use happyzone::{Identifier, Storage, Zone};
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;

const ORIGIN: &str = "example.com.";

const APEX: &str = "example.com. 3600 IN SOA ns1.example.com. hostmaster.example.com. 1 7200 3600 1209600 3600
example.com. 3600 IN NS ns1.example.com.
example.com. 3600 IN NS ns2.example.com.
";

fn canonical(records: &[Record]) -> Vec<(String, RrType, String)> {
    let mut keys: Vec<_> = records.iter().map(Record::canonical_key).collect();
    keys.sort();
    keys
}

fn zone_of(text: &str) -> Zone {
    let analysis = analyze_zone(ORIGIN, &parse_zone(text, ORIGIN).unwrap()).unwrap();
    Zone::from_analysis(Identifier::from_bytes(vec![1]), analysis)
}

#[test]
fn apex_soa_and_ns_fold_into_origin() {
    let records = parse_zone(APEX, ORIGIN).unwrap();
    let zone = zone_of(APEX);

    assert_eq!(zone.services.len(), 1);
    let apex = &zone.services[""];
    assert_eq!(apex.len(), 1);
    assert_eq!(apex[0].kind(), "abstract.Origin");
    let origin = apex[0].body_as::<Origin>().unwrap();
    assert_eq!(origin.soa.serial, 1);
    assert_eq!(origin.name_servers, ["ns1", "ns2"]);

    let generated = zone.records(ORIGIN).unwrap();
    assert_eq!(generated.len(), 3);
    assert_eq!(canonical(&generated), canonical(&records));
}

#[test]
fn mail_records_fold_out_per_kind() {
    let zone = zone_of(
        r#"example.com. 3600 IN MX 10 mail.example.com.
example.com. 3600 IN TXT "v=spf1 include:_spf.example.com ~all"
selector1._domainkey.example.com. 3600 IN TXT "v=DKIM1; k=rsa; p=ABC"
_dmarc.example.com. 3600 IN TXT "v=DMARC1; p=reject; pct=100"
"#,
    );

    let apex = &zone.services[""];
    let kinds: Vec<&str> = apex.iter().map(Service::kind).collect();
    assert_eq!(kinds, ["svcs.MXs", "svcs.SPF", "svcs.DKIMRecord", "svcs.DMARC"]);
    assert!(apex.iter().all(|s| s.meta.nb_resources == 1));
    assert_eq!(apex[2].body_as::<DKIMRecord>().unwrap().selector, "selector1");
    assert_eq!(zone.services.len(), 1);
}

#[test]
fn delegations_leave_the_apex_alone() {
    let zone = zone_of(&format!("{APEX}sub.example.com. 3600 IN NS a.ns.example.\n"));

    assert_eq!(zone.services[""].len(), 1);
    assert_eq!(zone.services[""][0].kind(), "abstract.Origin");
    let sub = &zone.services["sub"];
    assert_eq!(sub.len(), 1);
    let delegation = sub[0].body_as::<Delegation>().unwrap();
    assert_eq!(delegation.name_servers, ["a.ns.example."]);
}

#[test]
fn caa_records_form_one_policy() {
    let zone = zone_of(
        r#"@ 3600 IN CAA 0 issue "letsencrypt.org"
@ 3600 IN CAA 0 issuewild "comodoca.com"
@ 3600 IN CAA 0 issuemail "sectigo.com"
@ 3600 IN CAA 0 iodef "mailto:admin@example.com"
"#,
    );

    let apex = &zone.services[""];
    assert_eq!(apex.len(), 1);
    let policy = &apex[0];
    assert_eq!(policy.kind(), "svcs.CAAPolicy");
    for token in ["letsencrypt.org", "comodoca.com", "sectigo.com", "mailto:admin@example.com"] {
        assert!(policy.meta.comment.contains(token), "{} lacks {token}", policy.meta.comment);
    }
    assert_eq!(policy.body.get_nb_resources(), 4);
    let caa = policy.body_as::<CAAPolicy>().unwrap();
    let rrs = caa.get_records("", 3600, ORIGIN).unwrap();
    assert_eq!(rrs.len(), 4);
    assert!(rrs.iter().all(|rr| rr.rr_type() == RrType::CAA));
}

#[test]
fn serial_bump_and_new_host_diff() {
    let old = zone_of(APEX);
    let mut new = old.derive_new();
    let origin_id = new.services[""][0].meta.id.clone();
    let mut bumped = new.find_service(&origin_id).unwrap().1.clone();
    bumped.body_as_mut::<Origin>().unwrap().soa.serial = 2;
    new.erase_service("", ORIGIN, &origin_id, Some(bumped)).unwrap();
    new.append_service(
        "www",
        ORIGIN,
        Service::new(Server {
            a: Some("192.0.2.1".parse().unwrap()),
            ..Server::default()
        }),
    )
    .unwrap();

    let corrections = diff_zones(&old, &new, ORIGIN).unwrap();
    assert_eq!(corrections.len(), 2, "{corrections:?}");
    let change = corrections
        .iter()
        .find(|c| c.kind == CorrectionKind::Change)
        .unwrap();
    assert!(change.msg.contains("serial 1→2"), "{}", change.msg);
    assert_eq!(change.rrs[0].rr_type(), RrType::SOA);
    let create = corrections
        .iter()
        .find(|c| c.kind == CorrectionKind::Create)
        .unwrap();
    assert_eq!(create.rrs[0].to_string(), "www.example.com.\t3600\tIN\tA\t192.0.2.1");

    let mut records = old.records(ORIGIN).unwrap();
    for correction in &corrections {
        correction.apply_to(&mut records).unwrap();
    }
    assert_eq!(canonical(&records), canonical(&new.records(ORIGIN).unwrap()));
}

#[tokio::test]
async fn numeric_users_are_migrated() {
    let storage = Storage::in_memory();
    let put = |key: &'static str, value: Value| {
        let storage = storage.clone();
        async move {
            storage
                .kv()
                .put(key, serde_json::to_vec(&value).unwrap())
                .await
                .unwrap();
        }
    };
    storage.kv().put("version", b"1".to_vec()).await.unwrap();
    put(
        "user-5",
        json!({"Id": 5, "Email": "a@b", "created_at": "2020-01-01T00:00:00Z"}),
    )
    .await;
    put(
        "domain-0a",
        json!({"id": "0a", "id_owner": 5, "id_provider": "0b", "domain": "example.com.",
               "zone_history": []}),
    )
    .await;

    let version = migrations::migrate(&storage, &CancellationToken::new()).await.unwrap();
    assert_eq!(version, SCHEMA_VERSION);

    assert!(!storage.kv().has("user-5").await.unwrap());
    let user = storage.get_user(&Identifier::from_bytes(vec![5])).await.unwrap();
    assert_eq!(user.id.to_string(), "05");
    assert_eq!(user.email, "a@b");

    let raw: Value = serde_json::from_slice(&storage.kv().get("domain-0a").await.unwrap().unwrap()).unwrap();
    assert_eq!(raw["id_owner"], "05");
    let domain: Domain = serde_json::from_value(raw).unwrap();
    assert_eq!(storage.list_domains(&user.id).await.unwrap(), vec![domain]);
}
