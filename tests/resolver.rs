use epiflow::resolver::{EntityIndex, LookupSchema, LookupTable};

const COUNTRIES: &str = "\
name_en,iso2,iso3,uid,population,lat,long,country,wom_map
Korea,kr,kor,410,51269185,35.9078,127.7669,\"Korea, South\",S. Korea
Korea (North),kp,prk,408,25778816,40.3399,127.5101,Korea,North Korea
Greece,gr,grc,300,10423056,39.0742,21.8243,Greece,Greece
Kosovo,xk,xkx,383,,n/a,,Kosovo,
";

fn index() -> EntityIndex {
    let table =
        LookupTable::from_reader(COUNTRIES.as_bytes(), &LookupSchema::countries(), "countries")
            .unwrap();
    EntityIndex::build(&table)
}

#[test]
fn same_label_same_entity() {
    let index = index();
    let first = index.resolve("Korea, South");
    let second = index.resolve("  Korea, South ");
    assert!(first.matched);
    assert_eq!(first, second);
    assert_eq!(first.entity.iso3, "KOR");
}

#[test]
fn first_row_declaring_an_alias_wins() {
    let table =
        LookupTable::from_reader(COUNTRIES.as_bytes(), &LookupSchema::countries(), "countries")
            .unwrap();
    let index = EntityIndex::build(&table);
    let resolved = index.resolve("Korea");
    assert_eq!(resolved.entity.id, "410");
    assert_eq!(resolved, table.resolve("Korea"));
}

#[test]
fn unknown_label_gets_sentinel() {
    let index = index();
    for _ in 0..2 {
        let resolved = index.resolve("Atlantis");
        assert!(!resolved.matched);
        assert!(resolved.entity.is_unknown());
        assert_eq!(resolved.entity.population, 0);
        assert_eq!(resolved.entity.latitude, 0.0);
        assert!(resolved.entity.iso3.is_empty());
    }
}

#[test]
fn unparseable_numbers_read_as_zero() {
    let kosovo = index().resolve("Kosovo").entity;
    assert_eq!(kosovo.population, 0);
    assert_eq!((kosovo.latitude, kosovo.longitude), (0.0, 0.0));
    assert!(kosovo.point().is_none());
}

#[test]
fn matching_is_case_sensitive() {
    assert!(!index().resolve("greece").matched);
}

#[test]
fn missing_alias_column_is_an_error() {
    let broken = "name_en,iso2,iso3,uid,population,lat,long\nGreece,gr,grc,300,1,1,1\n";
    let result = LookupTable::from_reader(broken.as_bytes(), &LookupSchema::countries(), "broken");
    assert!(result.is_err());
}
